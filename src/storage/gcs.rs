//! GCS-compatible storage backend implementation
//!
//! Built on the google-cloud-storage client. Bucket provisioning goes through
//! the JSON API bucket resource (uniform bucket-level access at insert time,
//! versioning via patch); large uploads are streamed through the client's
//! chunked upload machinery, while large downloads fan out as ranged reads
//! under the shared part-size/concurrency policy.
//!
//! Generations take the role of S3 version ids: handles carry them as decimal
//! strings and they are parsed (and validated) before any network call.

use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::Client;
use google_cloud_storage::http::buckets::delete::DeleteBucketRequest;
use google_cloud_storage::http::buckets::get::GetBucketRequest;
use google_cloud_storage::http::buckets::insert::{
    BucketCreationConfig, InsertBucketParam, InsertBucketRequest,
};
use google_cloud_storage::http::buckets::patch::{BucketPatchConfig, PatchBucketRequest};
use google_cloud_storage::http::buckets::iam_configuration::UniformBucketLevelAccess;
use google_cloud_storage::http::buckets::{IamConfiguration, Versioning};
use google_cloud_storage::http::object_access_controls::PredefinedObjectAcl;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::Error as GcsError;
use google_cloud_storage::sign::{SignedURLMethod, SignedURLOptions};
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TransferConfig;
use crate::errors::{Result, StoreError};
use crate::storage::types::{
    BucketConfig, ObjectHandle, ObjectMetadata, ObjectPayload, PresignMethod, PresignRequest,
    TransferRequest,
};
use crate::storage::{part_ranges, StorageBackend};

/// Read buffer size for streamed uploads; chunking and parallelism of the
/// upload itself are owned by the client library.
const UPLOAD_STREAM_BUFFER: usize = 8 * 1024 * 1024;

/// GCS-compatible storage backend
pub struct GcsBackend {
    client: Client,
    project_id: Option<String>,
    transfer: TransferConfig,
}

impl std::fmt::Debug for GcsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBackend")
            .field("project_id", &self.project_id)
            .field("transfer", &self.transfer)
            .finish_non_exhaustive()
    }
}

impl GcsBackend {
    /// Create a backend from an already-constructed client
    ///
    /// The project id is required only for bucket creation; object operations
    /// work without it. Most callers should go through [`connect_gcs`].
    ///
    /// [`connect_gcs`]: crate::connect::connect_gcs
    pub fn new(client: Client, project_id: Option<String>) -> Self {
        Self {
            client,
            project_id,
            transfer: TransferConfig::default(),
        }
    }

    /// Set the default multipart transfer policy
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Keep all versions of objects uploaded under the same name, with the
    /// most recent one served by default
    async fn enable_bucket_versioning(&self, bucket: &str) -> Result<()> {
        let patch = PatchBucketRequest {
            bucket: bucket.to_string(),
            metadata: Some(BucketPatchConfig {
                versioning: Some(Versioning { enabled: true }),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.client
            .patch_bucket(&patch)
            .await
            .map_err(|e| map_gcs_error(bucket, "", e))?;
        info!(bucket = %bucket, "enabled versioning on bucket");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    async fn create_bucket(&self, config: &BucketConfig) -> Result<()> {
        config.validate()?;

        // Existence probe: a bucket already visible in this project is the
        // idempotent success case and no configuration is reapplied.
        match self
            .client
            .get_bucket(&GetBucketRequest {
                bucket: config.name.clone(),
                ..Default::default()
            })
            .await
        {
            Ok(_) => {
                info!(
                    bucket = %config.name,
                    "bucket already exists in this project, using the existing bucket"
                );
                return Ok(());
            }
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(map_gcs_error(&config.name, "", err)),
        }

        let project = self.project_id.clone().ok_or_else(|| {
            StoreError::Config("project id is required for bucket creation".into())
        })?;
        let bucket = BucketCreationConfig {
            location: config.location.clone(),
            iam_configuration: config.uniform_access.then(|| IamConfiguration {
                uniform_bucket_level_access: Some(UniformBucketLevelAccess {
                    enabled: true,
                    locked_time: None,
                }),
                public_access_prevention: None,
            }),
            ..Default::default()
        };
        // A 409 here means the name is taken in another project; the
        // global-namespace collision passes through with its status code.
        self.client
            .insert_bucket(&InsertBucketRequest {
                name: config.name.clone(),
                param: InsertBucketParam {
                    project,
                    ..Default::default()
                },
                bucket,
            })
            .await
            .map_err(|e| map_gcs_error(&config.name, "", e))?;
        info!(bucket = %config.name, "successfully created new bucket");

        if config.versioning {
            self.enable_bucket_versioning(&config.name).await?;
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket(&DeleteBucketRequest {
                bucket: bucket.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| map_gcs_error(bucket, "", e))?;
        info!(bucket = %bucket, "deleted bucket");
        Ok(())
    }

    async fn put_object(&self, payload: &ObjectPayload) -> Result<()> {
        payload.validate()?;
        let request = UploadObjectRequest {
            bucket: payload.bucket.clone(),
            predefined_acl: payload
                .acl
                .as_deref()
                .map(parse_predefined_acl)
                .transpose()?,
            ..Default::default()
        };
        let media = Media::new(payload.key.clone());
        self.client
            .upload_object(&request, payload.body.to_vec(), &UploadType::Simple(media))
            .await
            .map_err(|e| map_gcs_error(&payload.bucket, &payload.key, e))?;
        info!(bucket = %payload.bucket, key = %payload.key, "uploaded object");
        Ok(())
    }

    async fn get_object(&self, handle: &ObjectHandle) -> Result<Bytes> {
        handle.validate()?;
        let request = GetObjectRequest {
            bucket: handle.bucket.clone(),
            object: handle.key.clone(),
            generation: handle.generation()?,
            ..Default::default()
        };
        let data = self
            .client
            .download_object(&request, &Range::default())
            .await
            .map_err(|e| map_gcs_error(&handle.bucket, &handle.key, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_object_multipart(
        &self,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let bucket = &request.handle.bucket;
        let key = &request.handle.key;

        let file = tokio::fs::File::open(&request.file).await?;
        let total = file.metadata().await?.len();

        let mut media = Media::new(key.clone());
        media.content_length = Some(total);
        let stream = ReaderStream::with_capacity(file, UPLOAD_STREAM_BUFFER);
        let upload_request = UploadObjectRequest {
            bucket: bucket.clone(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(media);
        let upload = self
            .client
            .upload_streamed_object(&upload_request, stream, &upload_type);

        // Dropping the in-flight upload on cancellation aborts the request;
        // an incomplete chunked upload never becomes a visible object.
        tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            result = upload => {
                result.map_err(|e| map_gcs_error(bucket, key, e))?;
            }
        }
        info!(bucket = %bucket, key = %key, total_bytes = total, "uploaded object from file");
        Ok(())
    }

    async fn get_object_multipart(
        &self,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let (part_size, concurrency) = request.policy(self.transfer);
        let bucket = &request.handle.bucket;
        let key = &request.handle.key;

        let metadata = self
            .client
            .get_object(&GetObjectRequest {
                bucket: bucket.clone(),
                object: key.clone(),
                generation: request.handle.generation()?,
                ..Default::default()
            })
            .await
            .map_err(|e| map_gcs_error(bucket, key, e))?;
        let total = metadata.size.max(0) as u64;
        // Pin every ranged read to the generation just measured so a
        // concurrent overwrite cannot tear the reassembled file.
        let generation = Some(metadata.generation);

        // Created (and truncated) before any ranged read; a failed transfer
        // may leave the destination truncated or partially written.
        let file = Arc::new(std::fs::File::create(&request.file)?);
        if total == 0 {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for range in part_ranges(total, part_size) {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.shutdown().await;
                    return Err(StoreError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| StoreError::Cancelled)?
                }
            };

            let client = self.client.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            let file = Arc::clone(&file);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let get = GetObjectRequest {
                    bucket: bucket.clone(),
                    object: key.clone(),
                    generation,
                    ..Default::default()
                };
                let part_range = Range(Some(range.offset), Some(range.offset + range.len - 1));
                let download = client.download_object(&get, &part_range);
                let data = tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    result = download => result.map_err(|e| map_gcs_error(&bucket, &key, e))?,
                };
                // Positional writes keep reassembly independent of part
                // completion order.
                tokio::task::spawn_blocking(move || file.write_all_at(&data, range.offset))
                    .await
                    .map_err(|e| StoreError::backend("TaskJoin", e))??;
                Ok(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined.map_err(|e| StoreError::backend("TaskJoin", e))? {
                tasks.shutdown().await;
                return Err(err);
            }
        }
        debug!(bucket = %bucket, key = %key, total_bytes = total, "downloaded object in parts");
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        ObjectHandle::new(bucket, key).validate()?;
        match self
            .client
            .get_object(&GetObjectRequest {
                bucket: bucket.to_string(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(map_gcs_error(bucket, key, err)),
        }
    }

    async fn list_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        max_results: i32,
    ) -> Result<Vec<ObjectMetadata>> {
        if bucket.is_empty() {
            return Err(StoreError::Validation("bucket name must not be empty".into()));
        }
        let response = self
            .client
            .list_objects(&ListObjectsRequest {
                bucket: bucket.to_string(),
                prefix: Some(prefix.to_string()),
                max_results: Some(max_results),
                ..Default::default()
            })
            .await
            .map_err(|e| map_gcs_error(bucket, prefix, e))?;

        if response.next_page_token.is_some() {
            debug!(bucket = %bucket, prefix = %prefix, "listing truncated, more results available");
        }

        Ok(response
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|object| ObjectMetadata {
                last_modified: object.updated.and_then(|t| {
                    chrono::DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond())
                }),
                size: object.size.max(0) as u64,
                etag: Some(object.etag),
                version: Some(object.generation.to_string()),
                key: object.name,
            })
            .collect())
    }

    async fn presigned_url(&self, request: &PresignRequest) -> Result<String> {
        request.handle.validate()?;
        // Signed URLs target the current generation; the handle's version is
        // not embedded (matching the historical behavior of this variant).
        let options = SignedURLOptions {
            method: match request.method {
                PresignMethod::Get => SignedURLMethod::GET,
                PresignMethod::Put => SignedURLMethod::PUT,
            },
            expires: request.ttl,
            ..Default::default()
        };
        self.client
            .signed_url(&request.handle.bucket, &request.handle.key, None, None, options)
            .await
            .map_err(|e| StoreError::backend("SignedUrl", e))
    }
}

/// Map a canned ACL string onto the typed predefined ACL
fn parse_predefined_acl(acl: &str) -> Result<PredefinedObjectAcl> {
    match acl {
        "authenticated-read" => Ok(PredefinedObjectAcl::AuthenticatedRead),
        "bucket-owner-full-control" => Ok(PredefinedObjectAcl::BucketOwnerFullControl),
        "bucket-owner-read" => Ok(PredefinedObjectAcl::BucketOwnerRead),
        "private" => Ok(PredefinedObjectAcl::Private),
        "project-private" => Ok(PredefinedObjectAcl::ProjectPrivate),
        "public-read" => Ok(PredefinedObjectAcl::PublicRead),
        other => Err(StoreError::Validation(format!(
            "unsupported predefined ACL: {}",
            other
        ))),
    }
}

fn is_not_found(err: &GcsError) -> bool {
    matches!(err, GcsError::Response(response) if response.code == 404)
}

/// Map a client error onto the uniform taxonomy, preserving the HTTP status
/// as the backend code
fn map_gcs_error(bucket: &str, key: &str, err: GcsError) -> StoreError {
    match &err {
        GcsError::Response(response) => classify_status(response.code, bucket, key, err.to_string()),
        _ => StoreError::Backend {
            code: "TransportError".to_string(),
            message: err.to_string(),
        },
    }
}

fn classify_status(status: u16, bucket: &str, key: &str, message: String) -> StoreError {
    match status {
        404 => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        401 | 403 => StoreError::PermissionDenied(message),
        _ => StoreError::Backend {
            code: status.to_string(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_cloud_storage::client::ClientConfig;
    use std::io::Write;

    fn test_backend() -> GcsBackend {
        // Anonymous client; every test here returns before any network call.
        let client = Client::new(ClientConfig::default().anonymous());
        GcsBackend::new(client, Some("test-project".to_string()))
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(404, "b", "k", String::new()),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            classify_status(403, "b", "k", String::new()),
            StoreError::PermissionDenied(_)
        ));
        match classify_status(409, "b", "", "conflict".to_string()) {
            StoreError::Backend { code, .. } => assert_eq!(code, "409"),
            other => panic!("expected backend passthrough, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_predefined_acl() {
        assert!(matches!(
            parse_predefined_acl("public-read"),
            Ok(PredefinedObjectAcl::PublicRead)
        ));
        assert!(matches!(
            parse_predefined_acl("world-writable"),
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_put_object_validates_before_network() {
        let backend = test_backend();
        let payload = ObjectPayload::new("", "key", Bytes::from_static(b"data"));
        let err = backend.put_object(&payload).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_validates_before_network() {
        let backend = test_backend();
        let err = backend.list_with_prefix("", "builds/", 100).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_object_rejects_bad_generation() {
        let backend = test_backend();
        let handle = ObjectHandle::new("bucket", "key").with_version("not-numeric");
        let err = backend.get_object(&handle).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_multipart_upload_cancelled_before_start() {
        let backend = test_backend();
        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(&[7u8; 1024]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = TransferRequest::new(
            ObjectHandle::new("bucket", "cancelled.bin"),
            source.path(),
        );
        let err = backend
            .put_object_multipart(&request, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}

//! S3-compatible storage backend implementation
//!
//! Built directly on aws-sdk-s3 so the full provisioning surface is
//! available: ownership controls and public-access-block relaxation,
//! versioning, transfer acceleration, the native multipart protocol, and
//! request presigning.
//!
//! Backend failures are classified by their structured error code, never by
//! splitting error message text.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    AccelerateConfiguration, BucketAccelerateStatus, BucketLocationConstraint,
    BucketVersioningStatus, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    ObjectCannedAcl, ObjectOwnership, OwnershipControls, OwnershipControlsRule,
    PublicAccessBlockConfiguration, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::errors::{Result, StoreError};
use crate::storage::types::{
    BucketConfig, ObjectHandle, ObjectMetadata, ObjectPayload, PresignMethod, PresignRequest,
    TransferRequest,
};
use crate::storage::{part_ranges, PartRange, StorageBackend};

/// S3-compatible storage backend
///
/// Wraps an authenticated client pinned to one account and region. Cheap to
/// clone the inner client; safe to share across concurrent transfer calls.
#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    region: String,
    transfer: TransferConfig,
}

impl S3Backend {
    /// Create a backend from an already-constructed client
    ///
    /// Most callers should go through [`connect_s3`] instead, which resolves
    /// credentials and builds the client.
    ///
    /// [`connect_s3`]: crate::connect::connect_s3
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
            transfer: TransferConfig::default(),
        }
    }

    /// Set the default multipart transfer policy
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Region this session is pinned to
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Relax public-access blocking and set writer object ownership
    ///
    /// The backend turns ACLs off by default and blocks public access through
    /// them; both have to be lifted before per-object ACLs take effect.
    /// Re-applying on an already-configured bucket is a no-op.
    async fn enable_bucket_acl(&self, bucket: &str) -> Result<()> {
        let rule = OwnershipControlsRule::builder()
            .object_ownership(ObjectOwnership::ObjectWriter)
            .build()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let controls = OwnershipControls::builder()
            .rules(rule)
            .build()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        self.client
            .put_bucket_ownership_controls()
            .bucket(bucket)
            .ownership_controls(controls)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, "", e))?;

        let access = PublicAccessBlockConfiguration::builder()
            .block_public_policy(false)
            .build();
        self.client
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(access)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, "", e))?;

        info!(bucket = %bucket, "enabled ACL on bucket");
        Ok(())
    }

    /// Keep all versions of objects uploaded under the same key, with the
    /// most recent one served by default
    async fn enable_bucket_versioning(&self, bucket: &str) -> Result<()> {
        let versioning = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(versioning)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, "", e))?;
        info!(bucket = %bucket, "enabled versioning on bucket");
        Ok(())
    }

    /// Route uploads to the nearest edge location and on to the bucket over
    /// an optimized path
    async fn enable_transfer_acceleration(&self, bucket: &str) -> Result<()> {
        let accelerate = AccelerateConfiguration::builder()
            .status(BucketAccelerateStatus::Enabled)
            .build();
        self.client
            .put_bucket_accelerate_configuration()
            .bucket(bucket)
            .accelerate_configuration(accelerate)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, "", e))?;
        info!(bucket = %bucket, "enabled accelerated transfer for bucket");
        Ok(())
    }

    /// Read parts sequentially and upload them with bounded concurrency
    ///
    /// A semaphore permit covers both the part buffer and the in-flight
    /// request, so memory stays bounded at `concurrency * part_size`.
    async fn upload_parts(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        file: &mut tokio::fs::File,
        ranges: &[PartRange],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<Result<CompletedPart>> = JoinSet::new();

        for (index, range) in ranges.iter().enumerate() {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.shutdown().await;
                    return Err(StoreError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| StoreError::Cancelled)?
                }
            };

            let mut buffer = vec![0u8; range.len as usize];
            file.read_exact(&mut buffer).await?;

            let client = self.client.clone();
            let bucket = request.handle.bucket.clone();
            let key = request.handle.key.clone();
            let upload_id = upload_id.to_string();
            let cancel = cancel.clone();
            let part_number = (index + 1) as i32;

            tasks.spawn(async move {
                let _permit = permit;
                let send = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(buffer))
                    .send();
                let output = tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    result = send => result.map_err(|e| map_sdk_error(&bucket, &key, e))?,
                };
                Ok(CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build())
            });
        }

        let mut parts = Vec::with_capacity(ranges.len());
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| StoreError::backend("TaskJoin", e))? {
                Ok(part) => parts.push(part),
                Err(err) => {
                    tasks.shutdown().await;
                    return Err(err);
                }
            }
        }
        // Completion requires ascending part numbers even though parts finish
        // out of order.
        parts.sort_by_key(|part| part.part_number());
        Ok(parts)
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn create_bucket(&self, config: &BucketConfig) -> Result<()> {
        config.validate()?;

        let mut request = self.client.create_bucket().bucket(&config.name);
        // us-east-1 is the backend default and rejects an explicit constraint.
        if config.location != "us-east-1" {
            let constraint = BucketLocationConstraint::from(config.location.as_str());
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        if let Err(err) = request.send().await {
            let message = DisplayErrorContext(&err).to_string();
            let service = err.into_service_error();
            if service.is_bucket_already_owned_by_you() {
                info!(
                    bucket = %config.name,
                    "bucket already exists in this account, using the existing bucket"
                );
                return Ok(());
            }
            // Covers the global-namespace collision (name owned by another
            // account) and everything else, with the backend code preserved.
            return Err(classify_code(
                service.code().unwrap_or("Unknown"),
                &config.name,
                "",
                message,
            ));
        }
        info!(bucket = %config.name, "successfully created new bucket");

        if config.acl {
            self.enable_bucket_acl(&config.name).await?;
        }
        if config.versioning {
            self.enable_bucket_versioning(&config.name).await?;
        }
        if config.transfer_acceleration {
            self.enable_transfer_acceleration(&config.name).await?;
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, "", e))?;
        info!(bucket = %bucket, "deleted bucket");
        Ok(())
    }

    async fn put_object(&self, payload: &ObjectPayload) -> Result<()> {
        payload.validate()?;
        let mut request = self
            .client
            .put_object()
            .bucket(&payload.bucket)
            .key(&payload.key)
            .body(ByteStream::from(payload.body.clone()));
        if let Some(acl) = &payload.acl {
            request = request.acl(parse_canned_acl(acl)?);
        }
        request
            .send()
            .await
            .map_err(|e| map_sdk_error(&payload.bucket, &payload.key, e))?;
        info!(bucket = %payload.bucket, key = %payload.key, "uploaded object");
        Ok(())
    }

    async fn get_object(&self, handle: &ObjectHandle) -> Result<Bytes> {
        handle.validate()?;
        let response = self
            .client
            .get_object()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .set_version_id(handle.version.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(&handle.bucket, &handle.key, e))?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::backend("BodyRead", e))?;
        Ok(data.into_bytes())
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
        let (part_size, concurrency) = request.policy(self.transfer);
        let bucket = &request.handle.bucket;
        let key = &request.handle.key;

        let mut file = tokio::fs::File::open(&request.file).await?;
        let total = file.metadata().await?.len();
        let ranges = part_ranges(total, part_size);

        // The multipart protocol cannot complete with zero parts; an empty
        // source degenerates to an atomic empty single-shot put.
        if ranges.is_empty() {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from_static(&[]))
                .send()
                .await
                .map_err(|e| map_sdk_error(bucket, key, e))?;
            info!(bucket = %bucket, key = %key, "uploaded empty object");
            return Ok(());
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| {
                StoreError::backend("MissingUploadId", "backend returned no multipart upload id")
            })?
            .to_string();

        match self
            .upload_parts(request, &upload_id, &mut file, &ranges, concurrency, &cancel)
            .await
        {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(bucket, key, e))?;
                info!(
                    bucket = %bucket,
                    key = %key,
                    parts = ranges.len(),
                    total_bytes = total,
                    "uploaded object in parts"
                );
                Ok(())
            }
            Err(err) => {
                // No visible completed object may remain after a failed or
                // cancelled transfer.
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        bucket = %bucket,
                        key = %key,
                        error = %DisplayErrorContext(&abort_err),
                        "failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
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

        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(request.handle.version.clone())
            .send()
            .await;
        let total = match head {
            Ok(head) => head.content_length().unwrap_or(0).max(0) as u64,
            Err(err) => {
                let message = DisplayErrorContext(&err).to_string();
                let service = err.into_service_error();
                if service.is_not_found() {
                    return Err(StoreError::NotFound {
                        bucket: bucket.clone(),
                        key: key.clone(),
                    });
                }
                return Err(classify_code(
                    service.code().unwrap_or("Unknown"),
                    bucket,
                    key,
                    message,
                ));
            }
        };

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
            let version = request.handle.version.clone();
            let file = Arc::clone(&file);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let send = client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .set_version_id(version)
                    .range(format!(
                        "bytes={}-{}",
                        range.offset,
                        range.offset + range.len - 1
                    ))
                    .send();
                let output = tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    result = send => result.map_err(|e| map_sdk_error(&bucket, &key, e))?,
                };
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::backend("BodyRead", e))?
                    .into_bytes();
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
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let message = DisplayErrorContext(&err).to_string();
                let service = err.into_service_error();
                if service.is_not_found() {
                    return Ok(false);
                }
                Err(classify_code(
                    service.code().unwrap_or("Unknown"),
                    bucket,
                    key,
                    message,
                ))
            }
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
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_results)
            .send()
            .await
            .map_err(|e| map_sdk_error(bucket, prefix, e))?;

        if response.is_truncated().unwrap_or(false) {
            debug!(bucket = %bucket, prefix = %prefix, "listing truncated, more results available");
        }

        Ok(response
            .contents()
            .iter()
            .map(|object| ObjectMetadata {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().unwrap_or(0).max(0) as u64,
                last_modified: object
                    .last_modified()
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                etag: object.e_tag().map(str::to_string),
                version: None,
            })
            .collect())
    }

    async fn presigned_url(&self, request: &PresignRequest) -> Result<String> {
        request.handle.validate()?;
        let presigning = PresigningConfig::expires_in(request.ttl)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let bucket = &request.handle.bucket;
        let key = &request.handle.key;

        let uri = match request.method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .set_version_id(request.handle.version.clone())
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error(bucket, key, e))?
                .uri()
                .to_string(),
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error(bucket, key, e))?
                .uri()
                .to_string(),
        };
        Ok(uri)
    }
}

/// Map a canned ACL string onto the typed canned ACL
///
/// Unknown values fail validation before any network call instead of riding
/// to the backend as an opaque variant.
fn parse_canned_acl(acl: &str) -> Result<ObjectCannedAcl> {
    if ObjectCannedAcl::values().contains(&acl) {
        Ok(ObjectCannedAcl::from(acl))
    } else {
        Err(StoreError::Validation(format!(
            "unsupported canned ACL: {}",
            acl
        )))
    }
}

/// Map a structured backend error code onto the uniform taxonomy
fn classify_code(code: &str, bucket: &str, key: &str, message: String) -> StoreError {
    match code {
        "NoSuchKey" | "NoSuchBucket" | "NoSuchVersion" | "NotFound" => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "AccountProblem" => {
            StoreError::PermissionDenied(message)
        }
        _ => StoreError::Backend {
            code: code.to_string(),
            message,
        },
    }
}

/// Map an SDK error onto the uniform taxonomy, preserving the backend code
fn map_sdk_error<E, R>(bucket: &str, key: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.as_service_error().and_then(|service| service.code()) {
        Some(code) => classify_code(code, bucket, key, message),
        None => StoreError::Backend {
            code: "TransportError".to_string(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use std::io::Write;
    use std::time::Duration;

    fn test_backend() -> S3Backend {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                "AKIDEXAMPLE",
                "notarealsecretkey",
                None,
                None,
                "static",
            ))
            .build();
        S3Backend::new(Client::from_conf(config), "us-east-1")
    }

    #[test]
    fn test_classify_code() {
        assert!(matches!(
            classify_code("NoSuchKey", "b", "k", String::new()),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            classify_code("AccessDenied", "b", "k", String::new()),
            StoreError::PermissionDenied(_)
        ));
        let passthrough = classify_code("BucketAlreadyExists", "b", "", "taken".to_string());
        match passthrough {
            StoreError::Backend { code, .. } => assert_eq!(code, "BucketAlreadyExists"),
            other => panic!("expected backend passthrough, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_put_object_validates_before_network() {
        let backend = test_backend();
        let payload = ObjectPayload::new("bucket", "", Bytes::from_static(b"data"));
        let err = backend.put_object(&payload).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_exists_validates_before_network() {
        let backend = test_backend();
        let err = backend.exists("", "key").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_validates_before_network() {
        let backend = test_backend();
        let err = backend.list_with_prefix("", "builds/", 100).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_parse_canned_acl() {
        assert!(parse_canned_acl("public-read").is_ok());
        assert!(parse_canned_acl("bucket-owner-full-control").is_ok());
        assert!(matches!(
            parse_canned_acl("world-writable"),
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_put_object_rejects_unknown_acl() {
        let backend = test_backend();
        let payload = ObjectPayload::new("bucket", "key", Bytes::from_static(b"data"))
            .with_acl("world-writable");
        let err = backend.put_object(&payload).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_multipart_rejects_zero_part_size() {
        let backend = test_backend();
        let request = TransferRequest::new(ObjectHandle::new("bucket", "key"), "/tmp/nope")
            .with_part_size(0);
        let err = backend
            .put_object_multipart(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_multipart_upload_cancelled_before_start() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
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

    /// Minimal multipart wire conversation: admit the upload, then fire the
    /// cancellation token once the first part is on the wire and hold that
    /// response until the client drops the request. Abort gets a 204 so the
    /// cleanup path completes.
    async fn serve_multipart_until_cancelled(
        listener: tokio::net::TcpListener,
        cancel: CancellationToken,
    ) {
        use tokio::io::AsyncWriteExt;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                let mut read = 0;
                loop {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                    if read == buf.len() {
                        return;
                    }
                }
                let head = String::from_utf8_lossy(&buf[..read]).into_owned();
                if head.starts_with("POST") && head.contains("uploads") {
                    let body = "<InitiateMultipartUploadResult>\
                        <Bucket>bucket</Bucket><Key>large.bin</Key>\
                        <UploadId>upload-1</UploadId>\
                        </InitiateMultipartUploadResult>";
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/xml\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                } else if head.starts_with("PUT") {
                    cancel.cancel();
                    let mut sink = [0u8; 4096];
                    while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
                } else if head.starts_with("DELETE") {
                    let _ = socket
                        .write_all(b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n")
                        .await;
                }
            });
        }
    }

    #[tokio::test]
    async fn test_multipart_upload_cancelled_mid_transfer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve_multipart_until_cancelled(listener, cancel.clone()));

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                "AKIDEXAMPLE",
                "notarealsecretkey",
                None,
                None,
                "static",
            ))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        let backend = S3Backend::new(Client::from_conf(config), "us-east-1");

        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(&[5u8; 64 * 1024]).unwrap();
        source.flush().unwrap();

        let request = TransferRequest::new(ObjectHandle::new("bucket", "large.bin"), source.path())
            .with_part_size(16 * 1024)
            .with_concurrency(2);

        let err = backend
            .put_object_multipart(&request, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn test_presigned_get_url_metadata() {
        let backend = test_backend();
        let request = PresignRequest {
            handle: ObjectHandle::new("test-bucket-1", "test-object.txt"),
            method: PresignMethod::Get,
            ttl: Duration::from_secs(3600),
        };
        let url = backend.presigned_url(&request).await.unwrap();
        let parsed = url::Url::parse(&url).unwrap();

        assert!(parsed.path().ends_with("/test-object.txt"));
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().collect();
        assert_eq!(query.get("X-Amz-Expires").map(|v| v.as_ref()), Some("3600"));
        assert!(query.contains_key("X-Amz-Signature"));
    }

    #[tokio::test]
    async fn test_presigned_url_pins_version() {
        let backend = test_backend();
        let request = PresignRequest {
            handle: ObjectHandle::new("test-bucket-1", "test-object.txt")
                .with_version("3HL4kqtJlcpXroDTDmJ+rmSpXd3dIbrHY+MTRCxf3vjVBH40Nr8X8gdRQBpUMLUo"),
            method: PresignMethod::Get,
            ttl: Duration::from_secs(60),
        };
        let url = backend.presigned_url(&request).await.unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().collect();
        assert!(query.contains_key("versionId"));
    }

    #[tokio::test]
    async fn test_presigned_put_url() {
        let backend = test_backend();
        let request = PresignRequest {
            handle: ObjectHandle::new("test-bucket-1", "upload.bin"),
            method: PresignMethod::Put,
            ttl: Duration::from_secs(900),
        };
        let url = backend.presigned_url(&request).await.unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().collect();
        assert_eq!(query.get("X-Amz-Expires").map(|v| v.as_ref()), Some("900"));
        assert!(query.contains_key("X-Amz-Signature"));
    }

    #[tokio::test]
    async fn test_presign_rejects_zero_ttl() {
        let backend = test_backend();
        let request = PresignRequest {
            handle: ObjectHandle::new("test-bucket-1", "test-object.txt"),
            method: PresignMethod::Get,
            ttl: Duration::from_secs(0),
        };
        let err = backend.presigned_url(&request).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}

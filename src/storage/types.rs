//! Request and response types shared by the storage backends

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::TransferConfig;
use crate::errors::{Result, StoreError};

/// Configuration for bucket creation
///
/// Immutable once passed to [`StorageBackend::create_bucket`]; feature flags
/// the backend does not support are ignored by that variant (uniform access is
/// GCS-only, ACL relaxation and transfer acceleration are S3-only).
///
/// [`StorageBackend::create_bucket`]: crate::storage::StorageBackend::create_bucket
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Bucket name; global per backend account namespace
    pub name: String,
    /// Region/location the bucket is created in
    pub location: String,
    /// Keep all historical revisions of objects at the same key
    pub versioning: bool,
    /// Relax public-access blocking and set writer object ownership so
    /// per-object ACLs can be applied later
    pub acl: bool,
    /// Route uploads through the backend's accelerated edge network
    pub transfer_acceleration: bool,
    /// Govern all access by bucket-level policy, disabling per-object ACLs
    pub uniform_access: bool,
}

impl BucketConfig {
    /// Create a config with the given name and location and all features off
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            versioning: false,
            acl: false,
            transfer_acceleration: false,
            uniform_access: false,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Validation("bucket name must not be empty".into()));
        }
        if self.location.is_empty() {
            return Err(StoreError::Validation(
                "bucket location must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Identifies a unique (or versioned) blob
#[derive(Debug, Clone)]
pub struct ObjectHandle {
    /// Bucket holding the object
    pub bucket: String,
    /// Object key within the bucket
    pub key: String,
    /// Version id (S3) or decimal generation (GCS); `None` means the current
    /// version
    pub version: Option<String>,
}

impl ObjectHandle {
    /// Handle to the current version of an object
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version: None,
        }
    }

    /// Pin the handle to an exact version/generation
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StoreError::Validation("bucket name must not be empty".into()));
        }
        if self.key.is_empty() {
            return Err(StoreError::Validation("object key must not be empty".into()));
        }
        Ok(())
    }

    /// Parse the version string as a GCS generation number
    pub(crate) fn generation(&self) -> Result<Option<i64>> {
        match &self.version {
            None => Ok(None),
            Some(v) => v.parse::<i64>().map(Some).map_err(|_| {
                StoreError::Validation(format!("generation must be numeric, got {:?}", v))
            }),
        }
    }
}

/// In-memory object body for single-shot uploads
///
/// Large transfers should go through [`TransferRequest`] instead, which
/// references a local file and never materializes the whole object in memory.
#[derive(Debug, Clone)]
pub struct ObjectPayload {
    /// Destination bucket
    pub bucket: String,
    /// Destination key
    pub key: String,
    /// Object body
    pub body: Bytes,
    /// Optional canned ACL applied to the uploaded object
    pub acl: Option<String>,
}

impl ObjectPayload {
    /// Build a payload with no ACL
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            body: body.into(),
            acl: None,
        }
    }

    /// Set the canned ACL string (e.g. `public-read`)
    pub fn with_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StoreError::Validation("bucket name must not be empty".into()));
        }
        if self.key.is_empty() {
            return Err(StoreError::Validation("object key must not be empty".into()));
        }
        Ok(())
    }
}

/// One multipart transfer: an object handle, a local file reference, and the
/// part-size policy
///
/// Constructed per call and discarded after completion; carries no state
/// across retries.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Object being transferred
    pub handle: ObjectHandle,
    /// Local source (uploads) or destination (downloads) path
    pub file: PathBuf,
    /// Per-request part size override, in bytes
    pub part_size: Option<u64>,
    /// Per-request concurrency override
    pub concurrency: Option<usize>,
}

impl TransferRequest {
    /// Build a request using the backend's configured part size and
    /// concurrency
    pub fn new(handle: ObjectHandle, file: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            file: file.into(),
            part_size: None,
            concurrency: None,
        }
    }

    /// Override the part size for this request
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Override the concurrency for this request
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.handle.validate()?;
        if self.part_size == Some(0) {
            return Err(StoreError::Validation("part size must be positive".into()));
        }
        if self.concurrency == Some(0) {
            return Err(StoreError::Validation("concurrency must be positive".into()));
        }
        Ok(())
    }

    /// Effective (part size, concurrency) after applying backend defaults
    pub(crate) fn policy(&self, defaults: TransferConfig) -> (u64, usize) {
        (
            self.part_size.unwrap_or(defaults.part_size),
            self.concurrency.unwrap_or(defaults.concurrency),
        )
    }
}

/// Metadata for one listed object
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Backend entity tag
    pub etag: Option<String>,
    /// Version id / generation, when the bucket is versioned
    pub version: Option<String>,
}

/// HTTP method a presigned URL is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    /// Time-limited download URL
    Get,
    /// Time-limited upload URL
    Put,
}

/// Presigned URL request parameters: handle, method, and time-to-live
#[derive(Debug, Clone)]
pub struct PresignRequest {
    /// Object the URL grants access to
    pub handle: ObjectHandle,
    /// Method the URL is scoped to
    pub method: PresignMethod,
    /// How long the URL stays valid
    pub ttl: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_validation() {
        assert!(ObjectHandle::new("bucket", "key").validate().is_ok());
        assert!(matches!(
            ObjectHandle::new("", "key").validate(),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            ObjectHandle::new("bucket", "").validate(),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_generation_parsing() {
        let current = ObjectHandle::new("b", "k");
        assert_eq!(current.generation().unwrap(), None);

        let pinned = ObjectHandle::new("b", "k").with_version("1712345678901234");
        assert_eq!(pinned.generation().unwrap(), Some(1712345678901234));

        let bad = ObjectHandle::new("b", "k").with_version("not-a-generation");
        assert!(matches!(bad.generation(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_transfer_request_policy() {
        let request = TransferRequest::new(ObjectHandle::new("b", "k"), "/tmp/file.bin");
        assert!(request.validate().is_ok());
        assert_eq!(
            request.policy(TransferConfig::default()),
            (200 * 1024 * 1024, 5)
        );

        let tuned = request.clone().with_part_size(50 * 1024 * 1024).with_concurrency(8);
        assert_eq!(
            tuned.policy(TransferConfig::default()),
            (50 * 1024 * 1024, 8)
        );

        let zero_parts = request.with_part_size(0);
        assert!(matches!(
            zero_parts.validate(),
            Err(StoreError::Validation(_))
        ));
    }
}

//! Storage backend abstraction layer
//!
//! Provides a unified interface for moving objects in and out of different
//! blob storage backends (S3-compatible, GCS-compatible). The two variants
//! implement one trait, selected at construction time; all bucket
//! provisioning, transfer, and query operations flow through it.
//!
//! Transfer mechanics are delegated to the backend SDKs; this layer owns only
//! the policy above them: what to configure on a new bucket, how to shard
//! multipart work, and how to map backend-specific failures into the uniform
//! [`StoreError`] contract.
//!
//! [`StoreError`]: crate::errors::StoreError

mod gcs;
mod s3;
mod types;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::Result;
use crate::secrets::{SecretMap, SecretSource};

pub use gcs::GcsBackend;
pub use s3::S3Backend;
pub use types::{
    BucketConfig, ObjectHandle, ObjectMetadata, ObjectPayload, PresignMethod, PresignRequest,
    TransferRequest,
};

/// Storage backend trait for unified object storage operations
///
/// A backend is an authenticated session to one account/project and carries
/// an implicit region/location; it must not be shared across mismatched
/// regions. Implementations are safe for concurrent use across many transfer
/// calls.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a bucket with the given configuration
    ///
    /// Idempotent: a bucket already owned by the caller's account is success
    /// and no configuration is reapplied. A name owned by a different account
    /// is a hard error carrying the backend's own error code. On fresh
    /// creation, features are applied in a fixed order (ACL relaxation,
    /// versioning, acceleration/uniform access); the first failing step
    /// aborts and leaves a visible partial state that is safe to retry.
    async fn create_bucket(&self, config: &BucketConfig) -> Result<()>;

    /// Delete a bucket unconditionally
    ///
    /// No pre-check and no recursive object deletion; a non-empty-bucket
    /// precondition from the backend is surfaced as-is.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Upload an in-memory object in one shot
    ///
    /// The request shape is validated before any network call; the upload is
    /// atomic from the caller's perspective.
    async fn put_object(&self, payload: &ObjectPayload) -> Result<()>;

    /// Download an object into memory, pinned to the handle's version when set
    async fn get_object(&self, handle: &ObjectHandle) -> Result<Bytes>;

    /// Upload a local file as fixed-size parts with bounded concurrency
    ///
    /// A fired cancellation signal aborts in-flight and queued part uploads
    /// and returns [`StoreError::Cancelled`]; a partially uploaded transfer
    /// never leaves a visible completed object.
    ///
    /// [`StoreError::Cancelled`]: crate::errors::StoreError::Cancelled
    async fn put_object_multipart(
        &self,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Download an object into a local file as concurrent ranged reads
    ///
    /// The destination is created/truncated up front; a failed transfer may
    /// leave it truncated or partially written.
    async fn get_object_multipart(
        &self,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Check whether an object exists
    ///
    /// A backend not-found response maps to `Ok(false)`; every other error
    /// propagates and is never conflated with absence.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// List objects under a prefix, single page
    ///
    /// Returns at most `max_results` entries from the first page; no
    /// continuation-token looping is performed. Callers needing the full key
    /// space must loop themselves; a truncated page is logged at debug level.
    async fn list_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        max_results: i32,
    ) -> Result<Vec<ObjectMetadata>>;

    /// Generate a time-limited, method-scoped URL for a private object
    ///
    /// Signature correctness is delegated entirely to the backend SDK. The S3
    /// variant pins the handle's version id when present; GCS signed URLs
    /// always target the current generation.
    async fn presigned_url(&self, request: &PresignRequest) -> Result<String>;
}

/// Create a storage backend based on configuration
///
/// Resolves the account's secrets through the given source, builds the
/// matching variant, and returns it together with the residual secret map
/// (callers occasionally need fields like the account id beyond what the
/// session encapsulates).
pub async fn create_backend(
    config: &Config,
    secrets: &dyn SecretSource,
) -> Result<(Arc<dyn StorageBackend>, SecretMap)> {
    match config.backend_type {
        crate::config::BackendType::S3 => {
            let (backend, secrets) =
                crate::connect::connect_s3(secrets, &config.region, config.account_location)
                    .await?;
            Ok((Arc::new(backend.with_transfer(config.transfer)), secrets))
        }
        crate::config::BackendType::Gcs => {
            let (backend, secrets) =
                crate::connect::connect_gcs(secrets, config.account_location).await?;
            Ok((Arc::new(backend.with_transfer(config.transfer)), secrets))
        }
    }
}

/// One contiguous byte range of an object, transferred independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartRange {
    /// Offset of the first byte
    pub offset: u64,
    /// Number of bytes in the part
    pub len: u64,
}

/// Split `total` bytes into fixed-size parts
///
/// Every part is exactly `part_size` bytes except the last, which takes the
/// remainder. Returns no parts for an empty object. Part order never affects
/// final content; ranges are reassembled positionally.
pub(crate) fn part_ranges(total: u64, part_size: u64) -> Vec<PartRange> {
    debug_assert!(part_size > 0);
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < total {
        let len = part_size.min(total - offset);
        ranges.push(PartRange { offset, len });
        offset += len;
    }
    ranges
}

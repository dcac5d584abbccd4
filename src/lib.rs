//! blobstore - shared object storage library
//!
//! One [`StorageBackend`] trait over S3-compatible and GCS-compatible blob
//! stores: bucket provisioning with feature toggles, single-shot and
//! multipart object transfer, existence and prefix queries, and presigned
//! URL issuance.
//!
//! A backend is built once per account/region via [`create_backend`] (or the
//! lower-level connectors in [`connect`]) and shared across tasks:
//!
//! ```no_run
//! use blobstore::{create_backend, Config, StaticSecretSource};
//!
//! # async fn run() -> blobstore::Result<()> {
//! let config = Config::from_env()?;
//! let secrets = StaticSecretSource::new();
//! let (backend, _account) = create_backend(&config, &secrets).await?;
//! let exists = backend.exists("build-artifacts", "release/v1.2.3.tar.gz").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connect;
pub mod errors;
pub mod secrets;
pub mod storage;

pub use config::{AccountLocation, BackendType, Config, TransferConfig};
pub use errors::{Result, StoreError};
pub use secrets::{SecretMap, SecretSource, StaticSecretSource};
pub use storage::{
    create_backend, BucketConfig, GcsBackend, ObjectHandle, ObjectMetadata, ObjectPayload,
    PresignMethod, PresignRequest, S3Backend, StorageBackend, TransferRequest,
};

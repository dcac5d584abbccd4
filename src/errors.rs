//! Error types for blobstore
//!
//! Provides structured error handling using thiserror for all error cases
//! encountered by the library: request validation, backend failures,
//! cancellation, and configuration problems.
//!
//! No retries are performed inside this crate; every error is returned to the
//! immediate caller un-retried. Callers needing resilience wrap calls with
//! their own retry policy.

use thiserror::Error;

/// Main error type for blobstore operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Request failed shape validation before any network call
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or malformed environment/credential input
    #[error("configuration error: {0}")]
    Config(String),

    /// Object or bucket does not exist
    #[error("not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Resource already exists
    ///
    /// Bucket creation against a name already owned by the caller is treated
    /// as success and never surfaces this variant; it is reserved for callers
    /// layering conditional-create semantics on top of the library.
    #[error("already exists: {bucket}")]
    AlreadyExists { bucket: String },

    /// Backend rejected the caller's credentials or permissions
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Opaque backend failure, with the backend-specific error code preserved
    /// for diagnostics
    #[error("backend error [{code}]: {message}")]
    Backend { code: String, message: String },

    /// Operation aborted by a cancellation signal
    #[error("operation cancelled")]
    Cancelled,

    /// Local file IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Build a `Backend` error from a code and any displayable source
    pub fn backend(code: impl Into<String>, err: impl std::fmt::Display) -> Self {
        StoreError::Backend {
            code: code.into(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_preserves_code() {
        let err = StoreError::backend("BucketAlreadyExists", "name taken by another account");
        let rendered = err.to_string();
        assert!(rendered.contains("BucketAlreadyExists"));
        assert!(rendered.contains("name taken by another account"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}

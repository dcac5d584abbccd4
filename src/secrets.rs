//! Credential resolver interface
//!
//! The secret store itself is an external collaborator; this module defines
//! only the narrow interface the connection factory consumes: a resolver from
//! a logical account location to a [`SecretMap`], plus the well-known keys the
//! factory reads out of it. A [`StaticSecretSource`] is provided for embedding
//! and tests; real secret-store clients live outside this crate.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::config::AccountLocation;
use crate::errors::{Result, StoreError};

/// Access key id for the S3-side account
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
/// Secret access key for the S3-side account
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
/// Numeric account id of the S3-side account
pub const AWS_ACCOUNT_ID: &str = "AWS_ACCOUNT_ID";
/// Home region of the S3-side account
pub const AWS_REGION: &str = "AWS_REGION";
/// Service-account JSON for the GCS-side project
pub const GCP_CREDENTIALS_JSON: &str = "GCP_CREDENTIALS_JSON";
/// Project id of the GCS-side project
pub const GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";

/// Structured secret map returned by a [`SecretSource`]
///
/// Values are JSON because secret stores hand back a mix of plain strings and
/// JSON blobs (e.g. a whole service-account document). The map is consumed
/// once by the connection factory; residual fields (such as
/// [`AWS_ACCOUNT_ID`]) remain available to the caller afterwards.
#[derive(Debug, Clone, Default)]
pub struct SecretMap(HashMap<String, Value>);

impl SecretMap {
    /// Create an empty secret map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a secret value under the given key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a secret value, if present
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a secret as a string slice, failing with a descriptive
    /// configuration error when the key is absent or not a string
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(StoreError::Config(format!(
                "secret {} is not a string (got {})",
                key, other
            ))),
            None => Err(StoreError::Config(format!("secret {} is missing", key))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SecretMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Resolver from a logical account location to that account's secrets
///
/// Implementations are expected to fail fast on locations they do not hold
/// secrets for, before performing any network call they might otherwise make.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Resolve the secret map for the given account location
    async fn resolve_secrets(&self, location: AccountLocation) -> Result<SecretMap>;
}

/// In-memory secret source holding a fixed map per account location
///
/// Useful in tests and for callers that fetch secrets through their own
/// channel and only need to feed them into the connection factory.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretSource {
    accounts: HashMap<AccountLocation, SecretMap>,
}

impl StaticSecretSource {
    /// Create an empty source; resolves nothing until populated
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the secret map for one account location
    pub fn with_account(mut self, location: AccountLocation, secrets: SecretMap) -> Self {
        self.accounts.insert(location, secrets);
        self
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    async fn resolve_secrets(&self, location: AccountLocation) -> Result<SecretMap> {
        self.accounts.get(&location).cloned().ok_or_else(|| {
            StoreError::Config(format!("no secrets registered for {:?} account", location))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_str() {
        let secrets: SecretMap = [
            (AWS_ACCESS_KEY_ID, Value::from("AKIAEXAMPLE")),
            (AWS_ACCOUNT_ID, Value::from(123456789012u64)),
        ]
        .into_iter()
        .collect();

        assert_eq!(secrets.require_str(AWS_ACCESS_KEY_ID).unwrap(), "AKIAEXAMPLE");

        let err = secrets.require_str(AWS_SECRET_ACCESS_KEY).unwrap_err();
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));

        let err = secrets.require_str(AWS_ACCOUNT_ID).unwrap_err();
        assert!(err.to_string().contains("not a string"));
    }

    #[tokio::test]
    async fn test_static_source_unknown_location() {
        let source = StaticSecretSource::new().with_account(
            AccountLocation::Us,
            [(AWS_ACCESS_KEY_ID, "AKIAEXAMPLE")].into_iter().collect(),
        );

        assert!(source
            .resolve_secrets(AccountLocation::Us)
            .await
            .is_ok());
        let err = source
            .resolve_secrets(AccountLocation::India)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}

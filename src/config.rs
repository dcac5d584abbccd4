//! Configuration management for blobstore
//!
//! Supports configuration via:
//! - Environment variables (primary)
//! - Optional TOML config file (secondary)
//!
//! Environment variables take precedence over config file values.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{Result, StoreError};

/// Default part size for multipart transfers: 200 MiB.
///
/// One deployed variant historically used 50 MiB; the default is a single
/// documented value and the knob is explicit configuration
/// (`BLOBSTORE_PART_SIZE` or [`TransferConfig::part_size`]).
pub const DEFAULT_PART_SIZE: u64 = 200 * 1024 * 1024;

/// Default number of simultaneous part transfers per multipart call
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Backend storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// S3-compatible backend
    S3,
    /// GCS-compatible backend
    Gcs,
}

impl FromStr for BackendType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aws" | "s3" => Ok(BackendType::S3),
            "gcp" | "gcs" | "google" => Ok(BackendType::Gcs),
            _ => Err(StoreError::Config(format!("unknown backend type: {}", s))),
        }
    }
}

/// Logical account location, used by the credential resolver to select which
/// account's secrets to hand out
///
/// The set is closed; an unrecognized tag fails fast before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountLocation {
    /// US account
    Us,
    /// India account
    India,
}

impl AccountLocation {
    /// Secret path for this location on the S3 side
    pub fn aws_secret_path(&self) -> &'static str {
        match self {
            AccountLocation::Us => "US-ACCOUNT",
            AccountLocation::India => "INDIA-ACCOUNT",
        }
    }

    /// Secret path for this location on the GCS side
    pub fn gcp_secret_path(&self) -> &'static str {
        match self {
            AccountLocation::Us => "US-GCP-ACCOUNT",
            AccountLocation::India => "INDIA-GCP-ACCOUNT",
        }
    }
}

impl FromStr for AccountLocation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "US" | "US-VAULT" => Ok(AccountLocation::Us),
            "INDIA" | "INDIA-VAULT" => Ok(AccountLocation::India),
            _ => Err(StoreError::Config(format!(
                "invalid account location provided: {}",
                s
            ))),
        }
    }
}

/// Multipart transfer tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Fixed size of one part, in bytes
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Number of simultaneous part transfers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_account_location() -> AccountLocation {
    AccountLocation::India
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend variant to construct
    #[serde(rename = "type")]
    pub backend_type: BackendType,

    /// Region for the S3-side session and bucket location constraints
    #[serde(default = "default_region")]
    pub region: String,

    /// Logical account whose credentials the secret source should resolve
    #[serde(default = "default_account_location")]
    pub account_location: AccountLocation,

    /// Multipart transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - BLOBSTORE_BACKEND_TYPE: s3|gcs
    /// - BLOBSTORE_REGION: region string (default: us-east-1)
    /// - BLOBSTORE_ACCOUNT_LOCATION: us|india (default: india)
    /// - BLOBSTORE_PART_SIZE: multipart part size in bytes (default: 200 MiB)
    /// - BLOBSTORE_CONCURRENCY: simultaneous part transfers (default: 5)
    /// - BLOBSTORE_CONFIG_FILE: optional path to TOML config file
    pub fn from_env() -> Result<Self> {
        let config_file = std::env::var("BLOBSTORE_CONFIG_FILE").ok();
        let mut config = if let Some(path) = &config_file {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        if let Ok(backend_type) = std::env::var("BLOBSTORE_BACKEND_TYPE") {
            config.backend_type = BackendType::from_str(&backend_type)?;
        }

        if let Ok(region) = std::env::var("BLOBSTORE_REGION") {
            config.region = region;
        }

        if let Ok(location) = std::env::var("BLOBSTORE_ACCOUNT_LOCATION") {
            config.account_location = AccountLocation::from_str(&location)?;
        }

        if let Ok(part_size) = std::env::var("BLOBSTORE_PART_SIZE") {
            config.transfer.part_size = part_size
                .parse()
                .map_err(|_| StoreError::Config(format!("invalid part size: {}", part_size)))?;
        }

        if let Ok(concurrency) = std::env::var("BLOBSTORE_CONCURRENCY") {
            config.transfer.concurrency = concurrency.parse().map_err(|_| {
                StoreError::Config(format!("invalid concurrency: {}", concurrency))
            })?;
        }

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_type: BackendType::S3,
            region: default_region(),
            account_location: default_account_location(),
            transfer: TransferConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!(BackendType::from_str("aws").unwrap(), BackendType::S3);
        assert_eq!(BackendType::from_str("s3").unwrap(), BackendType::S3);
        assert_eq!(BackendType::from_str("gcs").unwrap(), BackendType::Gcs);
        assert!(BackendType::from_str("azure").is_err());
    }

    #[test]
    fn test_account_location_parsing() {
        assert_eq!(
            AccountLocation::from_str("US").unwrap(),
            AccountLocation::Us
        );
        assert_eq!(
            AccountLocation::from_str("india-vault").unwrap(),
            AccountLocation::India
        );
        let err = AccountLocation::from_str("EU").unwrap_err();
        assert!(err.to_string().contains("invalid account location"));
    }

    #[test]
    fn test_transfer_defaults() {
        let transfer = TransferConfig::default();
        assert_eq!(transfer.part_size, 200 * 1024 * 1024);
        assert_eq!(transfer.concurrency, 5);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            type = "gcs"
            region = "asia-south1"
            account_location = "india"

            [transfer]
            part_size = 52428800
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend_type, BackendType::Gcs);
        assert_eq!(config.region, "asia-south1");
        assert_eq!(config.transfer.part_size, 50 * 1024 * 1024);
        assert_eq!(config.transfer.concurrency, 5);
    }
}

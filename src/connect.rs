//! Connection factory: secrets in, authenticated backends out
//!
//! Each connector resolves the secrets for one logical account location,
//! builds an authenticated client from them, and hands back the backend
//! together with the residual secret map so callers can read account-level
//! fields (e.g. the account id) without a second secret-store round trip.

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client as GcsClient, ClientConfig};
use tracing::info;

use crate::config::AccountLocation;
use crate::errors::{Result, StoreError};
use crate::secrets::{
    SecretMap, SecretSource, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, GCP_CREDENTIALS_JSON,
    GCP_PROJECT_ID,
};
use crate::storage::{GcsBackend, S3Backend};

/// Build an S3 backend authenticated with the given account's static keys
///
/// The session is pinned to `region` regardless of the account's home region;
/// one backend per region is the expected usage.
pub async fn connect_s3(
    secrets: &dyn SecretSource,
    region: &str,
    location: AccountLocation,
) -> Result<(S3Backend, SecretMap)> {
    let secret_map = secrets.resolve_secrets(location).await?;
    let access_key = secret_map.require_str(AWS_ACCESS_KEY_ID)?;
    let secret_key = secret_map.require_str(AWS_SECRET_ACCESS_KEY)?;

    let credentials = Credentials::new(access_key, secret_key, None, None, "secret-source");
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .load()
        .await;
    let client = aws_sdk_s3::Client::new(&sdk_config);
    info!(region = %region, location = ?location, "connected s3 backend");

    Ok((S3Backend::new(client, region), secret_map))
}

/// Build a GCS backend from the given account's service-account JSON
pub async fn connect_gcs(
    secrets: &dyn SecretSource,
    location: AccountLocation,
) -> Result<(GcsBackend, SecretMap)> {
    let secret_map = secrets.resolve_secrets(location).await?;
    let credentials_json = secret_map.require_str(GCP_CREDENTIALS_JSON)?;

    let credentials: CredentialsFile = serde_json::from_str(credentials_json)
        .map_err(|e| StoreError::Config(format!("invalid GCP credentials JSON: {}", e)))?;
    // Project id for bucket creation: prefer the secret map, fall back to the
    // one embedded in the credentials.
    let project_id = match secret_map.get(GCP_PROJECT_ID) {
        Some(value) => value.as_str().map(String::from),
        None => credentials.project_id.clone(),
    };
    let config = ClientConfig::default()
        .with_credentials(credentials)
        .await
        .map_err(|e| StoreError::Config(format!("failed to build GCP client config: {}", e)))?;
    let client = GcsClient::new(config);
    info!(location = ?location, "connected gcs backend");

    Ok((GcsBackend::new(client, project_id), secret_map))
}

/// Build a GCS backend from ambient application-default credentials
///
/// Fails fast when `GOOGLE_APPLICATION_CREDENTIALS` is unset rather than
/// letting the first operation surface an opaque auth error.
pub async fn connect_gcs_default() -> Result<GcsBackend> {
    if std::env::var("GOOGLE_APPLICATION_CREDENTIALS").is_err() {
        return Err(StoreError::Config(
            "GOOGLE_APPLICATION_CREDENTIALS is not set".into(),
        ));
    }
    let config = ClientConfig::default()
        .with_auth()
        .await
        .map_err(|e| StoreError::Config(format!("failed to build GCP client config: {}", e)))?;
    let project_id = config.project_id.clone();
    Ok(GcsBackend::new(GcsClient::new(config), project_id))
}

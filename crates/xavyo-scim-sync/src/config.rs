//! Provider configuration loaded from environment variables.

use crate::auth::ScimCredentials;
use std::time::Duration;
use uuid::Uuid;

/// Settings for one outbound SCIM provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Provider identity; part of every connection key.
    pub provider_id: Uuid,

    /// Human-readable name, exposed to property mappings.
    pub name: String,

    /// Base URL of the SCIM target (e.g. "<https://api.example.com/scim/v2>").
    pub base_url: String,

    /// Credentials used to authenticate requests. `Debug` redacts secrets.
    pub credentials: ScimCredentials,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Verify the target's TLS certificate.
    pub tls_verify: bool,

    /// Retries for idempotent requests (GET, PUT, DELETE).
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    pub retry_base_delay_secs: u64,

    /// When set, only GET requests reach the target.
    pub dry_run: bool,
}

impl ProviderSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load settings from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let required =
            |key: &str| reader(key).map_err(|_| ConfigError::MissingVar(key.to_string()));

        let provider_id = required("SCIM_PROVIDER_ID")?
            .parse::<Uuid>()
            .map_err(|e| ConfigError::InvalidValue("SCIM_PROVIDER_ID".into(), e.to_string()))?;

        let name = reader("SCIM_PROVIDER_NAME").unwrap_or_else(|_| "scim".to_string());

        let base_url = required("SCIM_BASE_URL")?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "SCIM_BASE_URL".into(),
                "must be an http(s) URL".into(),
            ));
        }

        let auth_mode = reader("SCIM_AUTH_MODE").unwrap_or_else(|_| "bearer".to_string());
        let credentials = match auth_mode.to_lowercase().as_str() {
            "bearer" => ScimCredentials::Bearer {
                token: required("SCIM_TOKEN")?,
            },
            "oauth2" => ScimCredentials::OAuth2 {
                client_id: required("SCIM_OAUTH_CLIENT_ID")?,
                client_secret: required("SCIM_OAUTH_CLIENT_SECRET")?,
                token_endpoint: required("SCIM_OAUTH_TOKEN_ENDPOINT")?,
                scopes: reader("SCIM_OAUTH_SCOPES")
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            },
            other => {
                return Err(ConfigError::InvalidValue(
                    "SCIM_AUTH_MODE".into(),
                    format!("expected 'bearer' or 'oauth2', got '{other}'"),
                ))
            }
        };

        let timeout_secs = reader("SCIM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue("SCIM_TIMEOUT_SECS".into(), e.to_string()))?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SCIM_TIMEOUT_SECS".into(),
                "must be > 0".into(),
            ));
        }

        let tls_verify = reader("SCIM_TLS_VERIFY")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let max_retries = reader("SCIM_MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidValue("SCIM_MAX_RETRIES".into(), e.to_string()))?;

        let retry_base_delay_secs = reader("SCIM_RETRY_BASE_DELAY_SECS")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidValue("SCIM_RETRY_BASE_DELAY_SECS".into(), e.to_string())
            })?;

        let dry_run = reader("SCIM_DRY_RUN")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Self {
            provider_id,
            name,
            base_url,
            credentials,
            timeout: Duration::from_secs(timeout_secs),
            tls_verify,
            max_retries,
            retry_base_delay_secs,
            dry_run,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

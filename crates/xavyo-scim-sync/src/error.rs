//! Error types for outbound SCIM synchronization.

use crate::store::StoreError;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type ScimClientResult<T> = Result<T, ScimClientError>;

/// Errors raised while synchronizing a directory object to a SCIM target.
///
/// Every variant is scoped to the single object being processed; none of
/// them should abort a batch (see [`crate::sync::SyncEngine`]).
#[derive(Debug, Error)]
pub enum ScimClientError {
    /// The mapped attributes (or a remote document) do not form a valid
    /// SCIM resource.
    #[error("Validation failed for {kind}: {message}")]
    Validation { kind: &'static str, message: String },

    /// A property mapping rule failed to evaluate.
    #[error("Property mapping '{mapping}' failed: {message}")]
    Mapping { mapping: String, message: String },

    /// The target reports that the resource already exists (409).
    #[error("Resource already exists on target: {0}")]
    Conflict(String),

    /// The target does not know the resource (404).
    #[error("Resource not found on target: {0}")]
    NotFound(String),

    /// Authentication against the target failed.
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// The target throttled the request (429).
    #[error("Rate limited by target (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-2xx status.
    #[error("SCIM error (HTTP {status}): {detail}")]
    ScimError { status: u16, detail: String },

    /// The target could not be reached.
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    /// The request exceeded the transport timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Lower-level HTTP failure not covered above.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A 2xx response body was not valid JSON.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// A successful create returned no usable identifier.
    #[error("Target response for {0} carries no usable `id`")]
    MissingIdentifier(String),

    /// The remote write succeeded but the local connection could not be
    /// persisted. Local and remote state now disagree until an operator
    /// intervenes (unless `compensated` is true).
    #[error(
        "Remote {kind} {remote_id} was written but its connection could not be stored \
         (compensated: {compensated}): {source}"
    )]
    PersistAfterRemoteWrite {
        kind: &'static str,
        remote_id: String,
        compensated: bool,
        #[source]
        source: StoreError,
    },

    /// Connection store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Write request suppressed because the provider runs in dry-run mode.
    #[error("Dry run: {method} {path} was not sent")]
    DryRunRejected {
        method: String,
        path: String,
        body: Option<serde_json::Value>,
    },

    /// Invalid provider configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport gave up after exhausting its retry budget.
    #[error("Max retries exceeded after {attempts} attempt(s): {message}")]
    MaxRetriesExceeded { attempts: u32, message: String },
}

impl ScimClientError {
    /// Build a validation error for the given resource kind.
    pub fn validation(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }

    /// Build a mapping error for the named rule.
    pub fn mapping(mapping: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            mapping: mapping.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the HTTP layer rather than from local
    /// validation, mapping or persistence.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_)
                | Self::NotFound(_)
                | Self::AuthError(_)
                | Self::RateLimited { .. }
                | Self::ScimError { .. }
                | Self::Unreachable(_)
                | Self::Timeout(_)
                | Self::HttpError(_)
                | Self::ParseError(_)
                | Self::MaxRetriesExceeded { .. }
        )
    }

    /// Transient failures worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unreachable(_) | Self::Timeout(_)
        )
    }

    /// 5xx responses from the target.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ScimError { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for ScimClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Unreachable(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

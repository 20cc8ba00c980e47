//! SCIM 2.0 HTTP transport (reqwest-based).
//!
//! The sync clients only depend on [`ScimTransport`]; [`ScimClient`] is the
//! production implementation talking RFC 7644 to a real target.

use crate::auth::{ScimAuth, ScimCredentials};
use crate::config::ProviderSettings;
use crate::error::{ScimClientError, ScimClientResult};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// `application/scim+json`, RFC 7644 Section 3.1.
pub const SCIM_CONTENT_TYPE: &str = "application/scim+json";

/// SCIM `ServiceProviderConfig` (subset of RFC 7643 Section 5).
///
/// Every feature defaults to unsupported, which is also what callers get
/// when discovery fails.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderConfig {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub patch: FeatureSupport,
    #[serde(default)]
    pub bulk: BulkSupport,
    #[serde(default)]
    pub filter: FilterSupport,
    #[serde(default)]
    pub change_password: FeatureSupport,
    #[serde(default)]
    pub sort: FeatureSupport,
    #[serde(default)]
    pub etag: FeatureSupport,
}

/// Simple feature support flag.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureSupport {
    #[serde(default)]
    pub supported: bool,
}

/// Bulk operation support details.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSupport {
    #[serde(default)]
    pub supported: bool,
    #[serde(default)]
    pub max_operations: i64,
    #[serde(default)]
    pub max_payload_size: i64,
}

/// Filter support details.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSupport {
    #[serde(default)]
    pub supported: bool,
    #[serde(default)]
    pub max_results: i64,
}

/// One HTTP exchange with the target. `path` is relative to the base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ScimRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ScimRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    #[must_use]
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Request/response seam between the sync core and the network.
///
/// Implementations must bound every call (timeouts) and report failures as
/// typed errors; `Ok(None)` means a 2xx response without a body.
#[async_trait]
pub trait ScimTransport: Send + Sync {
    async fn send(&self, request: ScimRequest) -> ScimClientResult<Option<Value>>;
}

/// SCIM 2.0 HTTP client for outbound provisioning.
#[derive(Debug, Clone)]
pub struct ScimClient {
    /// Base URL without trailing slash.
    base_url: String,
    auth: ScimAuth,
    http_client: Client,
    retry_policy: RetryPolicy,
    dry_run: bool,
}

impl ScimClient {
    /// Create a new SCIM client.
    pub fn new(
        base_url: &str,
        credentials: ScimCredentials,
        timeout: Duration,
        tls_verify: bool,
    ) -> ScimClientResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!tls_verify)
            .user_agent(concat!("xavyo-scim-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ScimClientError::InvalidConfig(format!("Failed to build HTTP client: {e}"))
            })?;

        let auth = ScimAuth::new(credentials, http_client.clone());
        Ok(Self::with_http_client(base_url, auth, http_client))
    }

    /// Build a client from provider settings.
    pub fn from_settings(settings: &ProviderSettings) -> ScimClientResult<Self> {
        let client = Self::new(
            &settings.base_url,
            settings.credentials.clone(),
            settings.timeout,
            settings.tls_verify,
        )?;
        Ok(client
            .with_retry_policy(RetryPolicy::new(
                settings.max_retries,
                Duration::from_secs(settings.retry_base_delay_secs),
            ))
            .with_dry_run(settings.dry_run))
    }

    /// Create a client with a pre-built `reqwest::Client` (for testing).
    #[must_use]
    pub fn with_http_client(base_url: &str, auth: ScimAuth, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http_client,
            retry_policy: RetryPolicy::default(),
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// In dry-run mode every non-GET request is answered locally with
    /// [`ScimClientError::DryRunRejected`].
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_once(&self, request: &ScimRequest) -> ScimClientResult<Option<Value>> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, url = %url, "SCIM request");

        let mut builder = self.http_client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| ScimClientError::ParseError(format!("Failed to encode body: {e}")))?;
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, SCIM_CONTENT_TYPE)
                .body(bytes);
        }
        let builder = self.auth.apply(builder).await?;
        let response = builder.send().await?;
        self.handle_response(&request.method, response).await
    }

    /// DELETE and PATCH responses are informational: a 2xx status is
    /// success even when the body is not JSON.
    async fn handle_response(
        &self,
        method: &Method,
        response: reqwest::Response,
    ) -> ScimClientResult<Option<Value>> {
        let status = response.status();
        if !status.is_success() {
            return Err(self.error_from_response(response).await);
        }

        let body = response.bytes().await?;
        if status == StatusCode::NO_CONTENT || body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match serde_json::from_slice(&body) {
            Ok(document) => Ok(Some(document)),
            Err(e) if matches!(*method, Method::DELETE | Method::PATCH) => {
                debug!(method = %method, status = %status, error = %e, "Ignoring non-JSON success body");
                Ok(None)
            }
            Err(e) => Err(ScimClientError::ParseError(format!(
                "Failed to parse response: {e}"
            ))),
        }
    }

    async fn error_from_response(&self, response: reqwest::Response) -> ScimClientError {
        let status = response.status();

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());

        match status {
            StatusCode::NOT_FOUND => ScimClientError::NotFound(body),
            StatusCode::CONFLICT => ScimClientError::Conflict(body),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(retry_after_secs = ?retry_after, "SCIM target rate limited");
                ScimClientError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
            StatusCode::UNAUTHORIZED => {
                self.auth.invalidate_cache().await;
                ScimClientError::AuthError(format!("Authentication failed (401): {body}"))
            }
            _ => ScimClientError::ScimError {
                status: status.as_u16(),
                detail: if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    body
                },
            },
        }
    }
}

#[async_trait]
impl ScimTransport for ScimClient {
    async fn send(&self, request: ScimRequest) -> ScimClientResult<Option<Value>> {
        if self.dry_run && request.method != Method::GET {
            debug!(method = %request.method, path = %request.path, "Dry run, request not sent");
            return Err(ScimClientError::DryRunRejected {
                method: request.method.to_string(),
                path: request.path,
                body: request.body,
            });
        }

        if RetryPolicy::applies_to(&request.method) {
            let operation = format!("{} {}", request.method, request.path);
            self.retry_policy
                .execute(&operation, || self.send_once(&request))
                .await
        } else {
            self.send_once(&request).await
        }
    }
}

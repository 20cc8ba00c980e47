//! Request authentication for SCIM targets: static bearer token or `OAuth2`
//! client credentials.

use crate::error::{ScimClientError, ScimClientResult};
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Tokens are refreshed this long before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Credentials for a SCIM target.
///
/// The [`Debug`] impl redacts tokens and secrets.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScimCredentials {
    /// Static bearer token.
    Bearer { token: String },

    /// `OAuth2` client credentials grant.
    OAuth2 {
        client_id: String,
        client_secret: String,
        token_endpoint: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

impl std::fmt::Debug for ScimCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .finish(),
            Self::OAuth2 {
                client_id,
                token_endpoint,
                scopes,
                ..
            } => f
                .debug_struct("OAuth2")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("token_endpoint", token_endpoint)
                .field("scopes", scopes)
                .finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at.is_none_or(|exp| Instant::now() < exp)
    }
}

/// Applies credentials to outgoing requests. Clones share the token cache.
#[derive(Debug, Clone)]
pub struct ScimAuth {
    credentials: ScimCredentials,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    http_client: reqwest::Client,
}

impl ScimAuth {
    /// `http_client` is only used for `OAuth2` token requests.
    #[must_use]
    pub fn new(credentials: ScimCredentials, http_client: reqwest::Client) -> Self {
        Self {
            credentials,
            cached_token: Arc::new(RwLock::new(None)),
            http_client,
        }
    }

    /// Bearer token for the next request, fetching a fresh `OAuth2` token
    /// when the cached one is missing or expired.
    pub async fn bearer_token(&self) -> ScimClientResult<String> {
        let (client_id, client_secret, token_endpoint, scopes) = match &self.credentials {
            ScimCredentials::Bearer { token } => return Ok(token.clone()),
            ScimCredentials::OAuth2 {
                client_id,
                client_secret,
                token_endpoint,
                scopes,
            } => (client_id, client_secret, token_endpoint, scopes),
        };

        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.access_token.clone());
            }
        }

        debug!(token_endpoint = %token_endpoint, "Fetching OAuth2 access token");
        let scope = scopes.join(" ");
        let mut form = vec![("grant_type", "client_credentials")];
        if !scopes.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http_client
            .post(token_endpoint)
            .basic_auth(client_id, Some(client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| ScimClientError::AuthError(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ScimClientError::AuthError(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ScimClientError::AuthError(format!("Failed to parse token response: {e}"))
        })?;

        let expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN));

        *self.cached_token.write().await = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    /// Attach the `Authorization` header.
    pub async fn apply(&self, builder: RequestBuilder) -> ScimClientResult<RequestBuilder> {
        let token = self.bearer_token().await?;
        Ok(builder.bearer_auth(token))
    }

    /// Drop the cached `OAuth2` token (after a 401).
    pub async fn invalidate_cache(&self) {
        *self.cached_token.write().await = None;
    }
}

//! Provider session: identity, transport, connection store and the
//! capability descriptor discovered from the target.

use crate::client::{ScimClient, ScimRequest, ScimTransport, ServiceProviderConfig};
use crate::config::ProviderSettings;
use crate::error::ScimClientResult;
use crate::store::ConnectionStore;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

/// One configured SCIM target. Cheap to share behind an [`Arc`].
pub struct ScimProvider {
    id: Uuid,
    name: String,
    transport: Arc<dyn ScimTransport>,
    store: Arc<dyn ConnectionStore>,
    config: OnceCell<ServiceProviderConfig>,
}

impl std::fmt::Debug for ScimProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScimProvider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config.get())
            .finish_non_exhaustive()
    }
}

impl ScimProvider {
    #[must_use]
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        transport: Arc<dyn ScimTransport>,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            transport,
            store,
            config: OnceCell::new(),
        }
    }

    /// Build a provider talking HTTP to the configured target.
    pub fn from_settings(
        settings: &ProviderSettings,
        store: Arc<dyn ConnectionStore>,
    ) -> ScimClientResult<Self> {
        let client = ScimClient::from_settings(settings)?;
        info!(
            provider_id = %settings.provider_id,
            provider = %settings.name,
            base_url = %client.base_url(),
            dry_run = settings.dry_run,
            "SCIM provider configured"
        );
        Ok(Self::new(
            settings.provider_id,
            settings.name.clone(),
            Arc::new(client),
            store,
        ))
    }

    /// Skip discovery and use a known descriptor.
    #[must_use]
    pub fn with_service_provider_config(self, config: ServiceProviderConfig) -> Self {
        Self {
            config: OnceCell::new_with(Some(config)),
            ..self
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn transport(&self) -> &dyn ScimTransport {
        self.transport.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn ConnectionStore {
        self.store.as_ref()
    }

    /// Capability descriptor, fetched once per session.
    ///
    /// A failed or malformed discovery response yields the default
    /// descriptor (every feature unsupported) for the rest of the session.
    pub async fn service_provider_config(&self) -> &ServiceProviderConfig {
        self.config
            .get_or_init(|| async {
                match self.discover().await {
                    Ok(config) => {
                        info!(
                            provider_id = %self.id,
                            filter = config.filter.supported,
                            patch = config.patch.supported,
                            "Discovered SCIM service provider config"
                        );
                        config
                    }
                    Err(e) => {
                        warn!(
                            provider_id = %self.id,
                            error = %e,
                            "ServiceProviderConfig unavailable, assuming no optional features"
                        );
                        ServiceProviderConfig::default()
                    }
                }
            })
            .await
    }

    async fn discover(&self) -> ScimClientResult<ServiceProviderConfig> {
        let document = self
            .transport
            .send(ScimRequest::get("/ServiceProviderConfig"))
            .await?
            .unwrap_or_default();
        serde_json::from_value(document).map_err(|e| {
            crate::error::ScimClientError::ParseError(format!(
                "Invalid ServiceProviderConfig: {e}"
            ))
        })
    }
}

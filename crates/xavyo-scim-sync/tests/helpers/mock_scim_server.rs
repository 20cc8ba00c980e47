//! Mock SCIM target using wiremock, wired to a provider with an in-memory
//! connection store.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::{MockServer, Request};

use xavyo_scim_sync::auth::{ScimAuth, ScimCredentials};
use xavyo_scim_sync::client::{FeatureSupport, FilterSupport, ScimClient, ServiceProviderConfig};
use xavyo_scim_sync::directory::DirectoryUser;
use xavyo_scim_sync::mapper::AttributeMapper;
use xavyo_scim_sync::provider::ScimProvider;
use xavyo_scim_sync::provisioner::SyncClient;
use xavyo_scim_sync::reconciler::GroupSyncClient;
use xavyo_scim_sync::retry::RetryPolicy;
use xavyo_scim_sync::schema::ResourceKind;
use xavyo_scim_sync::store::{
    Connection, ConnectionStore, MemoryConnectionStore, NewConnection, StoreError, StoreResult,
};

pub const TEST_TOKEN: &str = "test-token-123";

/// Descriptor advertising filter and PATCH support.
pub fn full_features() -> ServiceProviderConfig {
    ServiceProviderConfig {
        patch: FeatureSupport { supported: true },
        filter: FilterSupport {
            supported: true,
            max_results: 200,
        },
        ..ServiceProviderConfig::default()
    }
}

/// Bearer-authenticated client without retries.
pub fn bearer_client(server: &MockServer) -> ScimClient {
    let auth = ScimAuth::new(
        ScimCredentials::Bearer {
            token: TEST_TOKEN.to_string(),
        },
        reqwest::Client::new(),
    );
    ScimClient::with_http_client(&server.uri(), auth, reqwest::Client::new())
        .with_retry_policy(RetryPolicy::none())
}

/// A wiremock SCIM target plus the provider session talking to it.
pub struct TestTarget {
    pub server: MockServer,
    pub store: Arc<MemoryConnectionStore>,
    pub provider: Arc<ScimProvider>,
}

impl TestTarget {
    /// Target advertising filter and PATCH support.
    pub async fn start() -> Self {
        Self::start_with(full_features()).await
    }

    /// Target with a fixed capability descriptor (no discovery request).
    pub async fn start_with(config: ServiceProviderConfig) -> Self {
        Self::build(Some(config), false).await
    }

    /// Target whose descriptor is discovered through
    /// `GET /ServiceProviderConfig`.
    pub async fn start_discovering() -> Self {
        Self::build(None, false).await
    }

    /// Target whose connection store rejects every insert.
    pub async fn start_with_failing_inserts(config: ServiceProviderConfig) -> Self {
        Self::build(Some(config), true).await
    }

    async fn build(config: Option<ServiceProviderConfig>, failing_inserts: bool) -> Self {
        super::init_test_logging();

        let server = MockServer::start().await;
        let store = Arc::new(MemoryConnectionStore::new());
        let provider_store: Arc<dyn ConnectionStore> = if failing_inserts {
            Arc::new(FailingInsertStore {
                inner: store.clone(),
            })
        } else {
            store.clone()
        };

        let provider = ScimProvider::new(
            Uuid::new_v4(),
            "mock-scim",
            Arc::new(bearer_client(&server)),
            provider_store,
        );
        let provider = match config {
            Some(config) => provider.with_service_provider_config(config),
            None => provider,
        };

        Self {
            server,
            store,
            provider: Arc::new(provider),
        }
    }

    pub fn provider_id(&self) -> Uuid {
        self.provider.id()
    }

    pub fn users(&self) -> SyncClient<DirectoryUser> {
        SyncClient::new(self.provider.clone(), AttributeMapper::for_users())
    }

    pub fn groups(&self) -> GroupSyncClient {
        GroupSyncClient::with_defaults(self.provider.clone())
    }

    /// Store a connection directly, as if the object had been synced before.
    pub async fn connect(&self, kind: ResourceKind, object_id: Uuid, remote_id: &str) -> Connection {
        self.store
            .insert(NewConnection {
                provider_id: self.provider_id(),
                resource_type: kind,
                object_id,
                remote_id: remote_id.to_string(),
                attributes: serde_json::Map::new(),
            })
            .await
            .unwrap()
    }

    pub async fn connection(&self, kind: ResourceKind, object_id: Uuid) -> Option<Connection> {
        self.store
            .get(self.provider_id(), kind, object_id)
            .await
            .unwrap()
    }

    /// Requests received so far with the given HTTP method.
    pub async fn received(&self, http_method: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == http_method)
            .collect()
    }

    /// Every request received so far.
    pub async fn all_received(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

/// Store that accepts reads, updates and deletes but fails every insert.
pub struct FailingInsertStore {
    inner: Arc<MemoryConnectionStore>,
}

#[async_trait]
impl ConnectionStore for FailingInsertStore {
    async fn get(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<Option<Connection>> {
        self.inner.get(provider_id, resource_type, object_id).await
    }

    async fn find_many(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>> {
        self.inner
            .find_many(provider_id, resource_type, object_ids)
            .await
    }

    async fn insert(&self, _connection: NewConnection) -> StoreResult<Connection> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn update(&self, connection: &Connection) -> StoreResult<Connection> {
        self.inner.update(connection).await
    }

    async fn delete(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<bool> {
        self.inner.delete(provider_id, resource_type, object_id).await
    }
}

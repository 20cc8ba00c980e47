//! In-process connection store.

use super::{Connection, ConnectionStore, NewConnection, StoreError, StoreResult};
use crate::schema::ResourceKind;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

type Key = (Uuid, ResourceKind, Uuid);

/// Connection store backed by a map. Nothing survives the process; use
/// [`super::PgConnectionStore`] for durable state.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    rows: RwLock<HashMap<Key, Connection>>,
}

impl MemoryConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored connections.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<Option<Connection>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(provider_id, resource_type, object_id)).cloned())
    }

    async fn find_many(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>> {
        let rows = self.rows.read().await;
        Ok(object_ids
            .iter()
            .filter_map(|id| rows.get(&(provider_id, resource_type, *id)).cloned())
            .collect())
    }

    async fn insert(&self, connection: NewConnection) -> StoreResult<Connection> {
        let key = (
            connection.provider_id,
            connection.resource_type,
            connection.object_id,
        );
        let mut rows = self.rows.write().await;
        if rows.contains_key(&key) {
            return Err(StoreError::Duplicate {
                provider_id: connection.provider_id,
                resource_type: connection.resource_type,
                object_id: connection.object_id,
            });
        }

        let now = Utc::now();
        let stored = Connection {
            id: Uuid::new_v4(),
            provider_id: connection.provider_id,
            resource_type: connection.resource_type,
            object_id: connection.object_id,
            remote_id: connection.remote_id,
            attributes: connection.attributes,
            created_at: now,
            updated_at: now,
        };
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, connection: &Connection) -> StoreResult<Connection> {
        let key = (
            connection.provider_id,
            connection.resource_type,
            connection.object_id,
        );
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&key)
            .filter(|row| row.id == connection.id)
            .ok_or(StoreError::Missing(connection.id))?;
        row.remote_id.clone_from(&connection.remote_id);
        row.attributes.clone_from(&connection.attributes);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<bool> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .remove(&(provider_id, resource_type, object_id))
            .is_some())
    }
}

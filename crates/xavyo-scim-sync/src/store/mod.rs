//! Connection store: the persisted local ↔ remote identity mapping.
//!
//! A [`Connection`] is the only durable synchronization state. There is at
//! most one per (provider, resource type, local object); it is created by a
//! successful remote create (or adoption), rewritten after every successful
//! remote write, and removed when the local object is deleted or the remote
//! object disappears.

mod memory;
mod postgres;

pub use memory::MemoryConnectionStore;
pub use postgres::PgConnectionStore;

use crate::schema::ResourceKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A connection already exists for this object.
    #[error("{resource_type} {object_id} already has a connection for provider {provider_id}")]
    Duplicate {
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    },

    /// The connection to update no longer exists.
    #[error("No connection {0}")]
    Missing(Uuid),

    /// Database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored data could not be decoded.
    #[error("Corrupt connection row: {0}")]
    Corrupt(String),
}

/// Persisted binding between a local object and its remote identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub resource_type: ResourceKind,
    pub object_id: Uuid,
    /// Remote identifier, always in canonical string form.
    pub remote_id: String,
    /// Last known raw remote document. Replaced wholesale on every write.
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConnection {
    pub provider_id: Uuid,
    pub resource_type: ResourceKind,
    pub object_id: Uuid,
    pub remote_id: String,
    pub attributes: Map<String, Value>,
}

/// Turn a raw remote document into cached attributes. Non-object documents
/// (or no document at all) cache as an empty map.
#[must_use]
pub fn cached_attributes(document: Option<Value>) -> Map<String, Value> {
    match document {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// CRUD over connections. Implementations must give per-row isolation;
/// `insert` must be atomic with respect to the uniqueness check.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Look up the connection for one local object.
    async fn get(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<Option<Connection>>;

    /// Look up connections for many local objects. Objects without a
    /// connection are simply absent from the result.
    async fn find_many(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>>;

    /// Create a connection. Fails with [`StoreError::Duplicate`] if one
    /// already exists for the object.
    async fn insert(&self, connection: NewConnection) -> StoreResult<Connection>;

    /// Persist `remote_id` and `attributes` of an existing connection and
    /// return the stored row.
    async fn update(&self, connection: &Connection) -> StoreResult<Connection>;

    /// Remove the connection for one local object. Returns whether a row
    /// existed.
    async fn delete(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<bool>;
}

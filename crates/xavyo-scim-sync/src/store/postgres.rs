//! Postgres-backed connection store.

use super::{Connection, ConnectionStore, NewConnection, StoreError, StoreResult};
use crate::schema::ResourceKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct ConnectionRow {
    id: Uuid,
    provider_id: Uuid,
    resource_type: String,
    object_id: Uuid,
    remote_id: String,
    attributes: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConnectionRow> for Connection {
    type Error = StoreError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        let resource_type = row
            .resource_type
            .parse::<ResourceKind>()
            .map_err(StoreError::Corrupt)?;
        Ok(Self {
            id: row.id,
            provider_id: row.provider_id,
            resource_type,
            object_id: row.object_id,
            remote_id: row.remote_id,
            attributes: row.attributes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Connection store over the `scim_connections` table.
#[derive(Debug, Clone)]
pub struct PgConnectionStore {
    pool: PgPool,
}

impl PgConnectionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("Running SCIM connection migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn get(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<Option<Connection>> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            r"
            SELECT * FROM scim_connections
            WHERE provider_id = $1
              AND resource_type = $2
              AND object_id = $3
            ",
        )
        .bind(provider_id)
        .bind(resource_type.as_str())
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Connection::try_from).transpose()
    }

    async fn find_many(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ConnectionRow>(
            r"
            SELECT * FROM scim_connections
            WHERE provider_id = $1
              AND resource_type = $2
              AND object_id = ANY($3)
            ",
        )
        .bind(provider_id)
        .bind(resource_type.as_str())
        .bind(object_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Connection::try_from).collect()
    }

    async fn insert(&self, connection: NewConnection) -> StoreResult<Connection> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            r"
            INSERT INTO scim_connections
                (provider_id, resource_type, object_id, remote_id, attributes)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider_id, resource_type, object_id) DO NOTHING
            RETURNING *
            ",
        )
        .bind(connection.provider_id)
        .bind(connection.resource_type.as_str())
        .bind(connection.object_id)
        .bind(&connection.remote_id)
        .bind(Json(&connection.attributes))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::Duplicate {
                provider_id: connection.provider_id,
                resource_type: connection.resource_type,
                object_id: connection.object_id,
            }),
        }
    }

    async fn update(&self, connection: &Connection) -> StoreResult<Connection> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            r"
            UPDATE scim_connections
            SET remote_id = $2,
                attributes = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(connection.id)
        .bind(&connection.remote_id)
        .bind(Json(&connection.attributes))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::Missing(connection.id))?.try_into()
    }

    async fn delete(
        &self,
        provider_id: Uuid,
        resource_type: ResourceKind,
        object_id: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM scim_connections
            WHERE provider_id = $1
              AND resource_type = $2
              AND object_id = $3
            ",
        )
        .bind(provider_id)
        .bind(resource_type.as_str())
        .bind(object_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

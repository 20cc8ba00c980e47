//! Sync client: create / update / delete lifecycle shared by users and
//! groups.
//!
//! Per object the lifecycle is `Absent` (no connection) → create →
//! `Synced` (connection exists) → update / delete. The connection is only
//! ever created after a successful remote create or an adoption of an
//! existing remote object, and is rewritten after every successful write.
//!
//! The core never retries. Retries of idempotent requests are a transport
//! concern (see [`crate::retry`]).

use crate::client::ScimRequest;
use crate::directory::DirectoryObject;
use crate::error::{ScimClientError, ScimClientResult};
use crate::mapper::{AttributeMapper, MappingContext};
use crate::provider::ScimProvider;
use crate::schema::{
    equality_filter, normalize, remote_id_from_document, to_payload, ListResponse, ResourceKind,
    ScimResource,
};
use crate::store::{cached_attributes, Connection, NewConnection};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of [`SyncClient::write`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Created(Connection),
    Updated(Connection),
}

impl WriteOutcome {
    #[must_use]
    pub fn connection(&self) -> &Connection {
        match self {
            Self::Created(c) | Self::Updated(c) => c,
        }
    }

    #[must_use]
    pub fn into_connection(self) -> Connection {
        match self {
            Self::Created(c) | Self::Updated(c) => c,
        }
    }
}

/// How a create ended up bound to a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// We created the remote object.
    Created,
    /// The remote object already existed and was adopted after a conflict.
    Adopted,
}

/// Synchronizes one kind of directory object to one provider.
pub struct SyncClient<O: DirectoryObject> {
    provider: Arc<ScimProvider>,
    mapper: AttributeMapper<O>,
}

impl<O: DirectoryObject> std::fmt::Debug for SyncClient<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("kind", &O::kind())
            .field("provider", &self.provider)
            .field("mapper", &self.mapper)
            .finish()
    }
}

impl<O: DirectoryObject> SyncClient<O> {
    #[must_use]
    pub fn new(provider: Arc<ScimProvider>, mapper: AttributeMapper<O>) -> Self {
        Self { provider, mapper }
    }

    #[must_use]
    pub fn provider(&self) -> &ScimProvider {
        &self.provider
    }

    /// Connection for `object`, if it has been synchronized before.
    pub async fn connection(&self, object: &O) -> ScimClientResult<Option<Connection>> {
        Ok(self
            .provider
            .store()
            .get(self.provider.id(), O::kind(), object.object_id())
            .await?)
    }

    /// Map and normalize `object` into the record sent to the target.
    pub fn build_record(
        &self,
        object: &O,
        connection: Option<&Connection>,
    ) -> ScimClientResult<O::Resource> {
        let context = MappingContext {
            provider_id: self.provider.id(),
            provider_name: self.provider.name(),
            connection,
        };
        let raw = self.mapper.build_schema(object, &context)?;
        normalize(raw, &object.object_id().to_string())
    }

    /// Create `object` on the target and persist its connection.
    ///
    /// A 409 from the target is resolved by adopting the existing remote
    /// object when the target supports filtering; otherwise the conflict is
    /// returned.
    pub async fn create(&self, object: &O) -> ScimClientResult<Connection> {
        let kind = O::kind();
        let record = self.build_record(object, None)?;
        let payload = to_payload(&record)?;

        let response = self
            .provider
            .transport()
            .send(ScimRequest::post(kind.endpoint(), payload))
            .await;

        let document = match response {
            Ok(document) => document,
            Err(ScimClientError::Conflict(detail)) => {
                return self.adopt(object, &record, detail).await;
            }
            Err(e) => {
                warn!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    object_id = %object.object_id(),
                    error = %e,
                    "Failed to create resource on SCIM target"
                );
                return Err(e);
            }
        };

        let remote_id = document
            .as_ref()
            .and_then(remote_id_from_document::<O::Resource>)
            .ok_or_else(|| {
                error!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    object_id = %object.object_id(),
                    "Create succeeded but the response carries no usable id"
                );
                ScimClientError::MissingIdentifier(format!("{kind} {}", object.object_id()))
            })?;

        self.persist(object, remote_id, cached_attributes(document), Binding::Created)
            .await
    }

    async fn adopt(
        &self,
        object: &O,
        record: &O::Resource,
        detail: String,
    ) -> ScimClientResult<Connection> {
        let kind = O::kind();
        let object_id = object.object_id();

        if !self.provider.service_provider_config().await.filter.supported {
            warn!(
                provider_id = %self.provider.id(),
                kind = %kind,
                object_id = %object_id,
                "Create conflicted and the target does not support filtering"
            );
            return Err(ScimClientError::Conflict(detail));
        }

        let Some(natural_key) = record.natural_key() else {
            return Err(ScimClientError::Conflict(detail));
        };

        let filter = equality_filter(kind.natural_key(), natural_key);
        debug!(kind = %kind, filter = %filter, "Looking up conflicting resource");

        let document = self
            .provider
            .transport()
            .send(ScimRequest::get(kind.endpoint()).with_query("filter", filter))
            .await?
            .unwrap_or(Value::Null);

        let list: ListResponse = if document.is_null() {
            ListResponse::default()
        } else {
            serde_json::from_value(document)
                .map_err(|e| ScimClientError::ParseError(format!("Invalid list response: {e}")))?
        };

        let resources = list.into_resources();
        if resources.len() > 1 {
            warn!(
                provider_id = %self.provider.id(),
                kind = %kind,
                object_id = %object_id,
                matches = resources.len(),
                "Conflict lookup is ambiguous, adopting the first match"
            );
        }

        let Some(existing) = resources.into_iter().next() else {
            warn!(
                provider_id = %self.provider.id(),
                kind = %kind,
                object_id = %object_id,
                "Create conflicted but no matching resource was found"
            );
            return Err(ScimClientError::Conflict(detail));
        };

        let remote_id = remote_id_from_document::<O::Resource>(&existing)
            .ok_or_else(|| ScimClientError::MissingIdentifier(format!("{kind} {object_id}")))?;

        info!(
            provider_id = %self.provider.id(),
            kind = %kind,
            object_id = %object_id,
            remote_id = %remote_id,
            "Adopting existing resource after create conflict"
        );

        self.persist(object, remote_id, cached_attributes(Some(existing)), Binding::Adopted)
            .await
    }

    /// Second phase of a create: store the connection. If that fails after
    /// we created the remote object, try to delete it again.
    async fn persist(
        &self,
        object: &O,
        remote_id: String,
        attributes: Map<String, Value>,
        binding: Binding,
    ) -> ScimClientResult<Connection> {
        let kind = O::kind();
        let inserted = self
            .provider
            .store()
            .insert(NewConnection {
                provider_id: self.provider.id(),
                resource_type: kind,
                object_id: object.object_id(),
                remote_id: remote_id.clone(),
                attributes,
            })
            .await;

        match inserted {
            Ok(connection) => {
                info!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    object_id = %connection.object_id,
                    remote_id = %connection.remote_id,
                    adopted = binding == Binding::Adopted,
                    "Resource synced to SCIM target"
                );
                Ok(connection)
            }
            Err(source) => {
                let compensated = match binding {
                    Binding::Created => self.compensate(kind, &remote_id).await,
                    Binding::Adopted => false,
                };
                error!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    object_id = %object.object_id(),
                    remote_id = %remote_id,
                    compensated,
                    error = %source,
                    "Remote write succeeded but the connection could not be stored"
                );
                Err(ScimClientError::PersistAfterRemoteWrite {
                    kind: kind.as_str(),
                    remote_id,
                    compensated,
                    source,
                })
            }
        }
    }

    async fn compensate(&self, kind: ResourceKind, remote_id: &str) -> bool {
        match self
            .provider
            .transport()
            .send(ScimRequest::delete(kind.resource_path(remote_id)))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    remote_id = %remote_id,
                    error = %e,
                    "Compensating delete failed, remote resource is orphaned"
                );
                false
            }
        }
    }

    /// Replace the remote object with the current mapping of `object`.
    ///
    /// The record's `id` is always the connection's remote id. A 404 means
    /// the remote object disappeared: the connection is removed and
    /// [`ScimClientError::NotFound`] returned.
    pub async fn update(&self, object: &O, connection: &Connection) -> ScimClientResult<Connection> {
        let kind = O::kind();
        let mut record = self.build_record(object, Some(connection))?;
        record.set_id(connection.remote_id.clone());
        let payload = to_payload(&record)?;

        let response = self
            .provider
            .transport()
            .send(ScimRequest::put(
                kind.resource_path(&connection.remote_id),
                payload.clone(),
            ))
            .await;

        let document = match response {
            Ok(document) => document,
            Err(ScimClientError::NotFound(detail)) => {
                warn!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    object_id = %connection.object_id,
                    remote_id = %connection.remote_id,
                    "Remote resource disappeared, dropping connection"
                );
                self.provider
                    .store()
                    .delete(connection.provider_id, kind, connection.object_id)
                    .await?;
                return Err(ScimClientError::NotFound(detail));
            }
            Err(e) => return Err(e),
        };

        let updated = Connection {
            attributes: cached_attributes(document.or(Some(payload))),
            ..connection.clone()
        };
        let stored = self.provider.store().update(&updated).await?;

        info!(
            provider_id = %self.provider.id(),
            kind = %kind,
            object_id = %stored.object_id,
            remote_id = %stored.remote_id,
            "Resource updated on SCIM target"
        );
        Ok(stored)
    }

    /// Delete `object` from the target.
    ///
    /// Without a connection this is a no-op and no request is sent. Returns
    /// whether a connection existed.
    pub async fn delete(&self, object: &O) -> ScimClientResult<bool> {
        let kind = O::kind();
        let Some(connection) = self.connection(object).await? else {
            debug!(
                provider_id = %self.provider.id(),
                kind = %kind,
                object_id = %object.object_id(),
                "No connection, nothing to delete"
            );
            return Ok(false);
        };

        match self
            .provider
            .transport()
            .send(ScimRequest::delete(kind.resource_path(&connection.remote_id)))
            .await
        {
            Ok(_) => {}
            Err(ScimClientError::NotFound(_)) => {
                warn!(
                    provider_id = %self.provider.id(),
                    kind = %kind,
                    remote_id = %connection.remote_id,
                    "Remote resource already gone"
                );
            }
            Err(e) => return Err(e),
        }

        self.provider
            .store()
            .delete(connection.provider_id, kind, connection.object_id)
            .await?;

        info!(
            provider_id = %self.provider.id(),
            kind = %kind,
            object_id = %connection.object_id,
            remote_id = %connection.remote_id,
            "Resource deleted from SCIM target"
        );
        Ok(true)
    }

    /// Create or update, depending on whether a connection exists. An update
    /// that finds the remote object gone falls back to a fresh create.
    pub async fn write(&self, object: &O) -> ScimClientResult<WriteOutcome> {
        let Some(connection) = self.connection(object).await? else {
            return self.create(object).await.map(WriteOutcome::Created);
        };

        match self.update(object, &connection).await {
            Ok(connection) => Ok(WriteOutcome::Updated(connection)),
            Err(ScimClientError::NotFound(_)) => {
                info!(
                    provider_id = %self.provider.id(),
                    kind = %O::kind(),
                    object_id = %object.object_id(),
                    "Re-creating resource missing on SCIM target"
                );
                self.create(object).await.map(WriteOutcome::Created)
            }
            Err(e) => Err(e),
        }
    }
}

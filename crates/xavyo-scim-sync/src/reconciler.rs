//! Group membership reconciliation.
//!
//! Remote membership is never rewritten wholesale. The reconciler reads the
//! current remote member list, derives the desired list from local
//! membership and user connections, and sends a single PATCH carrying only
//! the difference.

use crate::client::ScimRequest;
use crate::directory::{DirectoryGroup, DirectoryObject};
use crate::error::{ScimClientError, ScimClientResult};
use crate::mapper::AttributeMapper;
use crate::provider::ScimProvider;
use crate::provisioner::{SyncClient, WriteOutcome};
use crate::schema::{GroupMembers, PatchRequest, ResourceKind};
use crate::store::Connection;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a membership reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipChange {
    /// Nothing was sent: no connection, no difference, or the current remote
    /// state could not be read.
    Unchanged,
    /// A PATCH was sent.
    Patched {
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
        /// Target response, if it returned a body.
        response: Option<Value>,
    },
}

/// Set difference between remote and desired member ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl MembershipDiff {
    #[must_use]
    pub fn compute(current: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Reconciles remote group membership for one provider.
#[derive(Debug, Clone)]
pub struct MembershipReconciler {
    provider: Arc<ScimProvider>,
}

impl MembershipReconciler {
    #[must_use]
    pub fn new(provider: Arc<ScimProvider>) -> Self {
        Self { provider }
    }

    /// Bring the remote member list of `group` in line with local membership.
    ///
    /// Read failures of the remote group are logged and reported as
    /// [`MembershipChange::Unchanged`]; a failed PATCH is returned as an
    /// error.
    pub async fn reconcile_members(
        &self,
        group: &DirectoryGroup,
    ) -> ScimClientResult<MembershipChange> {
        let Some(connection) = self.group_connection(group).await? else {
            debug!(
                provider_id = %self.provider.id(),
                group_id = %group.id,
                "Group has no connection, skipping membership reconciliation"
            );
            return Ok(MembershipChange::Unchanged);
        };

        let Some(current) = self.current_members(&connection).await else {
            return Ok(MembershipChange::Unchanged);
        };
        let desired = self.user_remote_ids(&group.member_ids).await?;

        let diff = MembershipDiff::compute(&current, &desired);
        if diff.is_empty() {
            debug!(
                provider_id = %self.provider.id(),
                group_id = %group.id,
                remote_id = %connection.remote_id,
                members = current.len(),
                "Group membership already in sync"
            );
            return Ok(MembershipChange::Unchanged);
        }

        self.patch(&connection, diff).await
    }

    /// Incrementally add `user_ids` to the remote group.
    ///
    /// Uses a PATCH when the target supports it, otherwise falls back to a
    /// full [`reconcile_members`](Self::reconcile_members).
    pub async fn add_members(
        &self,
        group: &DirectoryGroup,
        user_ids: &[Uuid],
    ) -> ScimClientResult<MembershipChange> {
        self.incremental(group, user_ids, true).await
    }

    /// Incrementally remove `user_ids` from the remote group.
    pub async fn remove_members(
        &self,
        group: &DirectoryGroup,
        user_ids: &[Uuid],
    ) -> ScimClientResult<MembershipChange> {
        self.incremental(group, user_ids, false).await
    }

    async fn incremental(
        &self,
        group: &DirectoryGroup,
        user_ids: &[Uuid],
        add: bool,
    ) -> ScimClientResult<MembershipChange> {
        if !self.provider.service_provider_config().await.patch.supported {
            debug!(
                provider_id = %self.provider.id(),
                group_id = %group.id,
                "Target does not support PATCH, reconciling full membership"
            );
            return self.reconcile_members(group).await;
        }

        let Some(connection) = self.group_connection(group).await? else {
            warn!(
                provider_id = %self.provider.id(),
                group_id = %group.id,
                "Membership changed for a group without connection, skipping"
            );
            return Ok(MembershipChange::Unchanged);
        };

        let remote_ids = self.user_remote_ids(user_ids).await?;
        let diff = if add {
            MembershipDiff {
                to_add: remote_ids,
                ..MembershipDiff::default()
            }
        } else {
            MembershipDiff {
                to_remove: remote_ids,
                ..MembershipDiff::default()
            }
        };
        if diff.is_empty() {
            return Ok(MembershipChange::Unchanged);
        }

        self.patch(&connection, diff).await
    }

    async fn group_connection(
        &self,
        group: &DirectoryGroup,
    ) -> ScimClientResult<Option<Connection>> {
        Ok(self
            .provider
            .store()
            .get(self.provider.id(), ResourceKind::Group, group.object_id())
            .await?)
    }

    /// Member ids of the remote group, or `None` if it could not be read.
    async fn current_members(&self, connection: &Connection) -> Option<BTreeSet<String>> {
        let path = ResourceKind::Group.resource_path(&connection.remote_id);
        let document = match self.provider.transport().send(ScimRequest::get(path)).await {
            Ok(document) => document.unwrap_or(Value::Null),
            Err(e) => {
                warn!(
                    provider_id = %self.provider.id(),
                    remote_id = %connection.remote_id,
                    error = %e,
                    "Failed to fetch remote group, skipping membership reconciliation"
                );
                return None;
            }
        };

        match GroupMembers::from_document(&document) {
            Ok(group) => Some(group.member_ids()),
            Err(e) => {
                warn!(
                    provider_id = %self.provider.id(),
                    remote_id = %connection.remote_id,
                    error = %e,
                    "Remote group does not validate, skipping membership reconciliation"
                );
                None
            }
        }
    }

    /// Remote ids of the given local users. Users that were never synced
    /// cannot be referenced remotely and are skipped.
    async fn user_remote_ids(&self, user_ids: &[Uuid]) -> ScimClientResult<BTreeSet<String>> {
        let connections = self
            .provider
            .store()
            .find_many(self.provider.id(), ResourceKind::User, user_ids)
            .await?;

        let unique_users: BTreeSet<&Uuid> = user_ids.iter().collect();
        if connections.len() < unique_users.len() {
            warn!(
                provider_id = %self.provider.id(),
                skipped = unique_users.len() - connections.len(),
                "Some group members have no connection and were skipped"
            );
        }

        Ok(connections.into_iter().map(|c| c.remote_id).collect())
    }

    async fn patch(
        &self,
        connection: &Connection,
        diff: MembershipDiff,
    ) -> ScimClientResult<MembershipChange> {
        let Some(request) = PatchRequest::members(&diff.to_add, &diff.to_remove) else {
            return Ok(MembershipChange::Unchanged);
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| ScimClientError::validation("Group", e.to_string()))?;

        let response = self
            .provider
            .transport()
            .send(ScimRequest::patch(
                ResourceKind::Group.resource_path(&connection.remote_id),
                body,
            ))
            .await?;

        info!(
            provider_id = %self.provider.id(),
            group_id = %connection.object_id,
            remote_id = %connection.remote_id,
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            "Group membership patched"
        );

        Ok(MembershipChange::Patched {
            added: diff.to_add,
            removed: diff.to_remove,
            response,
        })
    }
}

/// Sync client for groups: the generic lifecycle plus membership
/// reconciliation after every create or update.
#[derive(Debug)]
pub struct GroupSyncClient {
    inner: SyncClient<DirectoryGroup>,
    members: MembershipReconciler,
}

impl GroupSyncClient {
    #[must_use]
    pub fn new(provider: Arc<ScimProvider>, mapper: AttributeMapper<DirectoryGroup>) -> Self {
        Self {
            members: MembershipReconciler::new(provider.clone()),
            inner: SyncClient::new(provider, mapper),
        }
    }

    /// Group client with the built-in group mapping.
    #[must_use]
    pub fn with_defaults(provider: Arc<ScimProvider>) -> Self {
        Self::new(provider, AttributeMapper::for_groups())
    }

    #[must_use]
    pub fn sync_client(&self) -> &SyncClient<DirectoryGroup> {
        &self.inner
    }

    #[must_use]
    pub fn reconciler(&self) -> &MembershipReconciler {
        &self.members
    }

    pub async fn create(&self, group: &DirectoryGroup) -> ScimClientResult<Connection> {
        let connection = self.inner.create(group).await?;
        self.reconcile_after_write(group).await;
        Ok(connection)
    }

    pub async fn update(
        &self,
        group: &DirectoryGroup,
        connection: &Connection,
    ) -> ScimClientResult<Connection> {
        let connection = self.inner.update(group, connection).await?;
        self.reconcile_after_write(group).await;
        Ok(connection)
    }

    pub async fn write(&self, group: &DirectoryGroup) -> ScimClientResult<WriteOutcome> {
        let outcome = self.inner.write(group).await?;
        self.reconcile_after_write(group).await;
        Ok(outcome)
    }

    pub async fn delete(&self, group: &DirectoryGroup) -> ScimClientResult<bool> {
        self.inner.delete(group).await
    }

    pub async fn reconcile_members(
        &self,
        group: &DirectoryGroup,
    ) -> ScimClientResult<MembershipChange> {
        self.members.reconcile_members(group).await
    }

    pub async fn add_members(
        &self,
        group: &DirectoryGroup,
        user_ids: &[Uuid],
    ) -> ScimClientResult<MembershipChange> {
        self.members.add_members(group, user_ids).await
    }

    pub async fn remove_members(
        &self,
        group: &DirectoryGroup,
        user_ids: &[Uuid],
    ) -> ScimClientResult<MembershipChange> {
        self.members.remove_members(group, user_ids).await
    }

    /// The group itself is written at this point; a membership failure must
    /// not turn that into an error.
    async fn reconcile_after_write(&self, group: &DirectoryGroup) {
        if let Err(e) = self.members.reconcile_members(group).await {
            warn!(
                group_id = %group.id,
                error = %e,
                "Membership reconciliation failed after group write"
            );
        }
    }
}

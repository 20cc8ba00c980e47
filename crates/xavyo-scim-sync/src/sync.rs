//! Batch sync engine.
//!
//! Pushes a batch of users and groups to one SCIM target. Users go first so
//! that group membership can reference them. A failure of one object is
//! recorded in the report and never stops the batch.

use crate::directory::{DirectoryGroup, DirectoryObject, DirectoryUser};
use crate::error::ScimClientResult;
use crate::mapper::AttributeMapper;
use crate::provider::ScimProvider;
use crate::provisioner::{SyncClient, WriteOutcome};
use crate::reconciler::GroupSyncClient;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub failed: u32,
    /// Failed objects with the error message.
    pub errors: Vec<(Uuid, String)>,
}

impl SyncReport {
    fn record_write(&mut self, object_id: Uuid, result: ScimClientResult<WriteOutcome>) {
        self.processed += 1;
        match result {
            Ok(WriteOutcome::Created(_)) => self.created += 1,
            Ok(WriteOutcome::Updated(_)) => self.updated += 1,
            Err(e) => self.record_failure(object_id, &e.to_string()),
        }
    }

    fn record_delete(&mut self, object_id: Uuid, result: ScimClientResult<bool>) {
        self.processed += 1;
        match result {
            Ok(true) => self.deleted += 1,
            Ok(false) => {}
            Err(e) => self.record_failure(object_id, &e.to_string()),
        }
    }

    fn record_failure(&mut self, object_id: Uuid, message: &str) {
        warn!(object_id = %object_id, error = %message, "Object sync failed");
        self.failed += 1;
        self.errors.push((object_id, message.to_string()));
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs user and group sync clients over a batch of objects.
#[derive(Debug)]
pub struct SyncEngine {
    users: SyncClient<DirectoryUser>,
    groups: GroupSyncClient,
}

impl SyncEngine {
    #[must_use]
    pub fn new(users: SyncClient<DirectoryUser>, groups: GroupSyncClient) -> Self {
        Self { users, groups }
    }

    /// Engine with the built-in user and group mappings.
    #[must_use]
    pub fn with_defaults(provider: Arc<ScimProvider>) -> Self {
        Self::new(
            SyncClient::new(provider.clone(), AttributeMapper::for_users()),
            GroupSyncClient::with_defaults(provider),
        )
    }

    #[must_use]
    pub fn users(&self) -> &SyncClient<DirectoryUser> {
        &self.users
    }

    #[must_use]
    pub fn groups(&self) -> &GroupSyncClient {
        &self.groups
    }

    /// Create or update every user, then every group (with membership).
    pub async fn run(&self, users: &[DirectoryUser], groups: &[DirectoryGroup]) -> SyncReport {
        let mut report = SyncReport::default();

        for user in users {
            report.record_write(user.object_id(), self.users.write(user).await);
        }
        for group in groups {
            report.record_write(group.object_id(), self.groups.write(group).await);
        }

        info!(
            provider_id = %self.users.provider().id(),
            processed = report.processed,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "SCIM sync run finished"
        );
        report
    }

    /// Delete every group, then every user.
    pub async fn delete_all(
        &self,
        users: &[DirectoryUser],
        groups: &[DirectoryGroup],
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for group in groups {
            report.record_delete(group.object_id(), self.groups.delete(group).await);
        }
        for user in users {
            report.record_delete(user.object_id(), self.users.delete(user).await);
        }

        info!(
            provider_id = %self.users.provider().id(),
            processed = report.processed,
            deleted = report.deleted,
            failed = report.failed,
            "SCIM delete run finished"
        );
        report
    }
}

//! Outbound SCIM 2.0 synchronization of directory users and groups.
//!
//! The [`provisioner::SyncClient`] drives the create / update / delete
//! lifecycle of one object kind against a [`provider::ScimProvider`]; the
//! [`reconciler::GroupSyncClient`] adds membership reconciliation for
//! groups. Local ↔ remote identities are persisted through a
//! [`store::ConnectionStore`].

pub mod auth;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod mapper;
pub mod provider;
pub mod provisioner;
pub mod reconciler;
pub mod retry;
pub mod schema;
pub mod store;
pub mod sync;

pub use client::{ScimClient, ScimRequest, ScimTransport, ServiceProviderConfig};
pub use config::ProviderSettings;
pub use directory::{DirectoryGroup, DirectoryObject, DirectoryUser};
pub use error::{ScimClientError, ScimClientResult};
pub use mapper::{AttributeMapper, MappingContext, PropertyMapping};
pub use provider::ScimProvider;
pub use provisioner::{SyncClient, WriteOutcome};
pub use reconciler::{GroupSyncClient, MembershipChange, MembershipReconciler};
pub use store::{Connection, ConnectionStore, MemoryConnectionStore, PgConnectionStore};
pub use sync::{SyncEngine, SyncReport};

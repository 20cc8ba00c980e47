//! Local directory objects handed to the sync clients.
//!
//! These are owned by the surrounding identity system; this crate only reads
//! them (and walks group membership).

use crate::schema::{ResourceKind, ScimGroup, ScimResource, ScimUser};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A user or group that can be synchronized to a SCIM target.
pub trait DirectoryObject: Serialize + Send + Sync {
    /// Typed remote record this object maps to.
    type Resource: ScimResource;

    /// Stable local identifier. Used as the connection key and as the
    /// default `externalId`.
    fn object_id(&self) -> Uuid;

    /// Resource kind, derived from the remote record type.
    fn kind() -> ResourceKind {
        <Self::Resource as ScimResource>::KIND
    }
}

/// Local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub username: String,
    /// Full display name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Free-form attributes available to property mappings.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

impl DirectoryUser {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            name: None,
            email: None,
            is_active: true,
            attributes: Map::new(),
        }
    }
}

impl DirectoryObject for DirectoryUser {
    type Resource = ScimUser;

    fn object_id(&self) -> Uuid {
        self.id
    }
}

/// Local group. Membership is a set of local user ids; order is irrelevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryGroup {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl DirectoryGroup {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            member_ids: Vec::new(),
            attributes: Map::new(),
        }
    }

    /// Builder-style membership.
    #[must_use]
    pub fn with_members(mut self, members: impl IntoIterator<Item = Uuid>) -> Self {
        self.member_ids.extend(members);
        self
    }
}

impl DirectoryObject for DirectoryGroup {
    type Resource = ScimGroup;

    fn object_id(&self) -> Uuid {
        self.id
    }
}

//! SCIM 2.0 resource schema (RFC 7643) as seen by the outbound client.
//!
//! Remote targets are not trusted to emit well-typed documents: resource and
//! member identifiers arrive as strings or numbers, `members` may be absent
//! or `null`, and unknown attributes are common. Every identifier is coerced
//! to its canonical string form at this boundary, so the rest of the crate
//! only ever compares strings.

use crate::error::{ScimClientError, ScimClientResult};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// SCIM Core User schema URI.
pub const USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";

/// SCIM Core Group schema URI.
pub const GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";

/// SCIM PATCH message schema URI.
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

/// SCIM list response schema URI.
pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";

/// The two resource types this client synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    User,
    Group,
}

impl ResourceKind {
    /// Resource type name as used in SCIM `meta.resourceType`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
        }
    }

    /// Collection endpoint relative to the target base URL.
    #[must_use]
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::User => "/Users",
            Self::Group => "/Groups",
        }
    }

    /// Canonical core schema URN.
    #[must_use]
    pub fn schema_urn(self) -> &'static str {
        match self {
            Self::User => USER_SCHEMA,
            Self::Group => GROUP_SCHEMA,
        }
    }

    /// Attribute that is unique per resource on the target, used to find an
    /// existing resource after a create conflict.
    #[must_use]
    pub fn natural_key(self) -> &'static str {
        match self {
            Self::User => "userName",
            Self::Group => "displayName",
        }
    }

    /// Path of a single resource.
    #[must_use]
    pub fn resource_path(self, remote_id: &str) -> String {
        format!("{}/{}", self.endpoint(), remote_id)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Group" => Ok(Self::Group),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}

// ── Identifier coercion ───────────────────────────────────────────────

/// Canonical string form of a remote identifier.
///
/// Strings are kept verbatim, numbers and booleans use their JSON text.
/// `null`, arrays and objects are not identifiers and yield `None`.
#[must_use]
pub fn coerce_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn deserialize_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce_identifier(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom("identifier must be a JSON scalar")),
    }
}

fn deserialize_member_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce_identifier(&value)
        .ok_or_else(|| de::Error::custom("member value must be a JSON scalar"))
}

/// Remove `null` entries from a mapped attribute map, descending into
/// nested objects. Values inside arrays are left alone.
pub fn drop_nulls(map: &mut Map<String, Value>) {
    map.retain(|_, value| !value.is_null());
    for value in map.values_mut() {
        if let Value::Object(inner) = value {
            drop_nulls(inner);
        }
    }
}

/// Make sure `urn` is declared, inserting it first when missing. Other
/// declared schemas keep their order.
pub fn ensure_schema(schemas: &mut Vec<String>, urn: &str) {
    if !schemas.iter().any(|s| s == urn) {
        schemas.insert(0, urn.to_string());
    }
}

// ── Resources ─────────────────────────────────────────────────────────

/// Common accessors over the typed User and Group records.
pub trait ScimResource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind of resource this record describes.
    const KIND: ResourceKind;

    fn schemas(&self) -> &[String];
    fn schemas_mut(&mut self) -> &mut Vec<String>;
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);
    fn external_id(&self) -> Option<&str>;
    fn set_external_id(&mut self, external_id: String);

    /// Value of the kind's natural unique attribute.
    fn natural_key(&self) -> Option<&str>;
}

/// SCIM User name component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honorific_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honorific_suffix: Option<String>,
}

/// Multi-valued attribute entry (emails, phoneNumbers, photos, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScimMultiValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// SCIM User resource (RFC 7643 Section 4.1).
///
/// Only fields that were actually populated are serialized; attributes this
/// crate does not model (extension schemas, `meta`, `photos`, ...) are kept
/// verbatim in `extensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUser {
    #[serde(default)]
    pub schemas: Vec<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_id: Option<String>,

    pub user_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<ScimName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<ScimMultiValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_numbers: Option<Vec<ScimMultiValue>>,

    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ScimResource for ScimUser {
    const KIND: ResourceKind = ResourceKind::User;

    fn schemas(&self) -> &[String] {
        &self.schemas
    }

    fn schemas_mut(&mut self) -> &mut Vec<String> {
        &mut self.schemas
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    fn set_external_id(&mut self, external_id: String) {
        self.external_id = Some(external_id);
    }

    fn natural_key(&self) -> Option<&str> {
        Some(self.user_name.as_str())
    }
}

/// Member reference inside a SCIM Group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScimGroupMember {
    /// Remote id of the member, coerced to string.
    #[serde(deserialize_with = "deserialize_member_value")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,

    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_uri: Option<String>,
}

/// SCIM Group resource (RFC 7643 Section 4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroup {
    #[serde(default)]
    pub schemas: Vec<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_id: Option<String>,

    pub display_name: String,

    /// `None` when the target omitted the attribute or sent `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<ScimGroupMember>>,

    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ScimGroup {
    /// Remote member ids; an absent or `null` member list is empty.
    #[must_use]
    pub fn member_ids(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .flatten()
            .map(|m| m.value.clone())
            .collect()
    }
}

/// Member list of a fetched group document. Only `members` is read, so
/// partial projections without `displayName` still parse.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GroupMembers {
    #[serde(default)]
    pub members: Option<Vec<ScimGroupMember>>,
}

impl GroupMembers {
    /// Parse the member list out of a raw group document.
    pub fn from_document(document: &Value) -> ScimClientResult<Self> {
        Self::deserialize(document)
            .map_err(|e| ScimClientError::validation(ResourceKind::Group.as_str(), e.to_string()))
    }

    /// Remote member ids; an absent or `null` member list is empty.
    #[must_use]
    pub fn member_ids(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .flatten()
            .map(|m| m.value.clone())
            .collect()
    }
}

impl ScimResource for ScimGroup {
    const KIND: ResourceKind = ResourceKind::Group;

    fn schemas(&self) -> &[String] {
        &self.schemas
    }

    fn schemas_mut(&mut self) -> &mut Vec<String> {
        &mut self.schemas
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    fn set_external_id(&mut self, external_id: String) {
        self.external_id = Some(external_id);
    }

    fn natural_key(&self) -> Option<&str> {
        Some(self.display_name.as_str())
    }
}

// ── Normalization ─────────────────────────────────────────────────────

/// Turn a raw mapped attribute map into a validated record.
///
/// Null-valued keys are dropped first, the kind's core schema URN is
/// guaranteed, and `externalId` falls back to `local_id` when the mapping
/// did not supply one.
pub fn normalize<T: ScimResource>(
    mut raw: Map<String, Value>,
    local_id: &str,
) -> ScimClientResult<T> {
    drop_nulls(&mut raw);
    let mut record: T = serde_json::from_value(Value::Object(raw))
        .map_err(|e| ScimClientError::validation(T::KIND.as_str(), e.to_string()))?;

    ensure_schema(record.schemas_mut(), T::KIND.schema_urn());

    if record.external_id().is_none_or(str::is_empty) {
        record.set_external_id(local_id.to_string());
    }

    Ok(record)
}

/// Validate a document received from the target.
pub fn parse_resource<T: ScimResource>(document: &Value) -> ScimClientResult<T> {
    T::deserialize(document)
        .map_err(|e| ScimClientError::validation(T::KIND.as_str(), e.to_string()))
}

/// Serialize a record for a write request. Unset fields are omitted.
pub fn to_payload<T: ScimResource>(record: &T) -> ScimClientResult<Value> {
    serde_json::to_value(record)
        .map_err(|e| ScimClientError::validation(T::KIND.as_str(), e.to_string()))
}

/// Extract the remote identifier from a response document.
///
/// The typed record is tried first; if the document does not validate, the
/// raw `id` attribute is coerced directly. Empty identifiers are rejected.
#[must_use]
pub fn remote_id_from_document<T: ScimResource>(document: &Value) -> Option<String> {
    let id = match parse_resource::<T>(document) {
        Ok(record) => record.id().map(str::to_string),
        Err(e) => {
            warn!(
                kind = %T::KIND,
                error = %e,
                "Target response does not validate, falling back to raw id"
            );
            document.get("id").and_then(coerce_identifier)
        }
    };
    id.filter(|id| !id.is_empty())
}

// ── Messages ──────────────────────────────────────────────────────────

/// PATCH operation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// Single PATCH operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// SCIM PATCH request (RFC 7644 Section 3.5.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
    /// Membership delta as add/remove operations on `members`.
    ///
    /// Returns `None` when both sets are empty.
    #[must_use]
    pub fn members(to_add: &BTreeSet<String>, to_remove: &BTreeSet<String>) -> Option<Self> {
        let member_values = |ids: &BTreeSet<String>| {
            Value::Array(
                ids.iter()
                    .map(|id| serde_json::json!({ "value": id }))
                    .collect(),
            )
        };

        let mut operations = Vec::new();
        if !to_add.is_empty() {
            operations.push(PatchOperation {
                op: PatchOp::Add,
                path: Some("members".to_string()),
                value: Some(member_values(to_add)),
            });
        }
        if !to_remove.is_empty() {
            operations.push(PatchOperation {
                op: PatchOp::Remove,
                path: Some("members".to_string()),
                value: Some(member_values(to_remove)),
            });
        }

        if operations.is_empty() {
            return None;
        }

        Some(Self {
            schemas: vec![PATCH_OP_SCHEMA.to_string()],
            operations,
        })
    }
}

/// SCIM list response (RFC 7644 Section 3.4.2). Resources stay untyped so
/// callers can keep the raw document alongside the validated record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResponse {
    #[serde(rename = "totalResults", default)]
    pub total_results: Option<u64>,
    #[serde(rename = "Resources", default)]
    pub resources: Option<Vec<Value>>,
}

impl ListResponse {
    /// Resources in response order; absent or `null` is empty.
    #[must_use]
    pub fn into_resources(self) -> Vec<Value> {
        self.resources.unwrap_or_default()
    }
}

/// Build an equality filter on the natural key, quoting and escaping the
/// value (RFC 7644 Section 3.4.2.2).
#[must_use]
pub fn equality_filter(attribute: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{attribute} eq \"{escaped}\"")
}

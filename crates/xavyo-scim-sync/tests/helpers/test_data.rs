//! Directory objects and SCIM documents used across the suites.

use serde_json::{json, Value};
use uuid::Uuid;
use xavyo_scim_sync::directory::{DirectoryGroup, DirectoryUser};
use xavyo_scim_sync::schema::{GROUP_SCHEMA, LIST_RESPONSE_SCHEMA, USER_SCHEMA};

/// Active user with a work email and a two-part display name.
pub fn user(username: &str) -> DirectoryUser {
    let mut user = DirectoryUser::new(username);
    user.email = Some(format!("{username}@example.com"));
    user.name = Some(format!("{username} Tester"));
    user
}

pub fn group(name: &str, members: &[&DirectoryUser]) -> DirectoryGroup {
    DirectoryGroup::new(name).with_members(members.iter().map(|u| u.id))
}

/// Minimal user document as a target would return it.
pub fn user_document(id: Value, user_name: &str) -> Value {
    json!({
        "schemas": [USER_SCHEMA],
        "id": id,
        "userName": user_name,
        "active": true,
    })
}

/// Group document with the given raw `members` value.
pub fn group_document(id: Value, display_name: &str, members: Value) -> Value {
    json!({
        "schemas": [GROUP_SCHEMA],
        "id": id,
        "displayName": display_name,
        "members": members,
    })
}

/// Group document without a `members` attribute.
pub fn group_document_without_members(id: Value, display_name: &str) -> Value {
    json!({
        "schemas": [GROUP_SCHEMA],
        "id": id,
        "displayName": display_name,
    })
}

pub fn list_response(resources: Vec<Value>) -> Value {
    json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": resources.len(),
        "Resources": resources,
    })
}

/// Member list entries from raw values (strings or numbers).
pub fn members(values: &[Value]) -> Value {
    Value::Array(values.iter().map(|v| json!({ "value": v })).collect())
}

pub fn random_remote_id() -> String {
    Uuid::new_v4().to_string()
}

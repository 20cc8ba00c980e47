//! Integration tests for group sync and membership reconciliation.
//!
//! Tests cover:
//! - Minimal add/remove PATCH over mixed string/integer member ids
//! - Null, absent and unreadable remote member lists
//! - Group create payloads and integer group ids
//! - Incremental add/remove with and without PATCH support

mod helpers;

use helpers::mock_scim_server::TestTarget;
use helpers::test_data::{group, group_document, group_document_without_members, members, user};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};
use xavyo_scim_sync::client::ServiceProviderConfig;
use xavyo_scim_sync::directory::DirectoryUser;
use xavyo_scim_sync::error::ScimClientError;
use xavyo_scim_sync::reconciler::MembershipChange;
use xavyo_scim_sync::schema::{ResourceKind, GROUP_SCHEMA, PATCH_OP_SCHEMA};

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

/// Connect each user to the given remote id.
async fn connect_users(target: &TestTarget, users: &[(&DirectoryUser, &str)]) {
    for (user, remote_id) in users {
        target.connect(ResourceKind::User, user.id, remote_id).await;
    }
}

async fn mount_group(target: &TestTarget, remote_id: &str, document: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/Groups/{remote_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(document))
        .mount(&target.server)
        .await;
}

async fn mount_patch(target: &TestTarget, remote_id: &str, expected: u64) {
    Mock::given(method("PATCH"))
        .and(path(format!("/Groups/{remote_id}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(expected)
        .mount(&target.server)
        .await;
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_membership_diff_sends_single_minimal_patch() {
    let target = TestTarget::start().await;
    let (u2, u3, u4) = (user("u2"), user("u3"), user("u4"));
    connect_users(&target, &[(&u2, "2"), (&u3, "3"), (&u4, "4")]).await;

    let engineering = group("engineering", &[&u2, &u3, &u4]);
    target
        .connect(ResourceKind::Group, engineering.id, "g1")
        .await;

    mount_group(
        &target,
        "g1",
        group_document(json!("g1"), "engineering", members(&[json!(1), json!(2), json!(3)])),
    )
    .await;
    mount_patch(&target, "g1", 1).await;

    let change = target
        .groups()
        .reconcile_members(&engineering)
        .await
        .unwrap();
    assert_eq!(
        change,
        MembershipChange::Patched {
            added: ids(&["4"]),
            removed: ids(&["1"]),
            response: None,
        }
    );

    let patches = target.received("PATCH").await;
    assert_eq!(patches.len(), 1);
    let body: Value = patches[0].body_json().unwrap();
    assert_eq!(
        body,
        json!({
            "schemas": [PATCH_OP_SCHEMA],
            "Operations": [
                {"op": "add", "path": "members", "value": [{"value": "4"}]},
                {"op": "remove", "path": "members", "value": [{"value": "1"}]},
            ]
        })
    );
}

#[tokio::test]
async fn test_equal_sets_with_mixed_wire_types_send_nothing() {
    let target = TestTarget::start().await;
    let (u2, u3) = (user("u2"), user("u3"));
    connect_users(&target, &[(&u2, "2"), (&u3, "3")]).await;

    let team = group("team", &[&u2, &u3]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    mount_group(
        &target,
        "g1",
        group_document(json!("g1"), "team", members(&[json!(2), json!("3")])),
    )
    .await;
    mount_patch(&target, "g1", 0).await;

    let change = target.groups().reconcile_members(&team).await.unwrap();
    assert_eq!(change, MembershipChange::Unchanged);
}

#[tokio::test]
async fn test_null_and_absent_members_are_empty() {
    for document in [
        group_document(json!("g1"), "team", Value::Null),
        group_document_without_members(json!("g1"), "team"),
        group_document(json!("g1"), "team", json!([])),
    ] {
        let target = TestTarget::start().await;
        let u1 = user("u1");
        connect_users(&target, &[(&u1, "10")]).await;

        let team = group("team", &[&u1]);
        target.connect(ResourceKind::Group, team.id, "g1").await;

        mount_group(&target, "g1", document).await;
        mount_patch(&target, "g1", 1).await;

        let change = target.groups().reconcile_members(&team).await.unwrap();
        assert_eq!(
            change,
            MembershipChange::Patched {
                added: ids(&["10"]),
                removed: BTreeSet::new(),
                response: None,
            }
        );
    }
}

#[tokio::test]
async fn test_unconnected_members_are_skipped() {
    let target = TestTarget::start().await;
    let (synced, never_synced) = (user("synced"), user("never-synced"));
    connect_users(&target, &[(&synced, "s1")]).await;

    let team = group("team", &[&synced, &never_synced]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    mount_group(
        &target,
        "g1",
        group_document(json!("g1"), "team", members(&[json!("s1")])),
    )
    .await;
    mount_patch(&target, "g1", 0).await;

    let change = target.groups().reconcile_members(&team).await.unwrap();
    assert_eq!(change, MembershipChange::Unchanged);
}

#[tokio::test]
async fn test_group_without_connection_sends_nothing() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "1")]).await;

    let change = target
        .groups()
        .reconcile_members(&group("team", &[&u1]))
        .await
        .unwrap();
    assert_eq!(change, MembershipChange::Unchanged);
    assert!(target.all_received().await.is_empty());
}

#[tokio::test]
async fn test_unreadable_remote_group_is_not_fatal() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "1")]).await;
    let team = group("team", &[&u1]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    Mock::given(method("GET"))
        .and(path("/Groups/g1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&target.server)
        .await;
    mount_patch(&target, "g1", 0).await;

    let change = target.groups().reconcile_members(&team).await.unwrap();
    assert_eq!(change, MembershipChange::Unchanged);
}

#[tokio::test]
async fn test_invalid_remote_group_is_not_fatal() {
    for document in [
        // member values must be scalars
        json!({"id": "g1", "displayName": "team", "members": [{"value": {"nested": 1}}]}),
        json!({"id": "g1", "displayName": "team", "members": "everyone"}),
    ] {
        let target = TestTarget::start().await;
        let u1 = user("u1");
        connect_users(&target, &[(&u1, "1")]).await;
        let team = group("team", &[&u1]);
        target.connect(ResourceKind::Group, team.id, "g1").await;

        mount_group(&target, "g1", document).await;
        mount_patch(&target, "g1", 0).await;

        let change = target.groups().reconcile_members(&team).await.unwrap();
        assert_eq!(change, MembershipChange::Unchanged);
    }
}

#[tokio::test]
async fn test_patch_failure_is_returned() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "1")]).await;
    let team = group("team", &[&u1]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    mount_group(&target, "g1", group_document(json!("g1"), "team", json!([]))).await;
    Mock::given(method("PATCH"))
        .and(path("/Groups/g1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&target.server)
        .await;

    let err = target.groups().reconcile_members(&team).await.unwrap_err();
    assert!(matches!(err, ScimClientError::ScimError { status: 500, .. }));
}

#[tokio::test]
async fn test_patch_with_text_body_counts_as_patched() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "1")]).await;
    let team = group("team", &[&u1]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    mount_group(&target, "g1", group_document(json!("g1"), "team", json!([]))).await;
    Mock::given(method("PATCH"))
        .and(path("/Groups/g1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&target.server)
        .await;

    let change = target.groups().reconcile_members(&team).await.unwrap();
    assert_eq!(
        change,
        MembershipChange::Patched {
            added: ids(&["1"]),
            removed: BTreeSet::new(),
            response: None,
        }
    );
}

#[tokio::test]
async fn test_partial_group_document_is_reconciled() {
    let target = TestTarget::start().await;
    let (u1, u2) = (user("u1"), user("u2"));
    connect_users(&target, &[(&u1, "1"), (&u2, "2")]).await;
    let team = group("team", &[&u1, &u2]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    // Projection with members only, no displayName.
    mount_group(&target, "g1", json!({"id": "g1", "members": members(&[json!(1)])})).await;
    mount_patch(&target, "g1", 1).await;

    let change = target.groups().reconcile_members(&team).await.unwrap();
    assert!(matches!(
        change,
        MembershipChange::Patched { ref added, ref removed, .. }
            if *added == ids(&["2"]) && removed.is_empty()
    ));
}

// =============================================================================
// Group lifecycle
// =============================================================================

#[tokio::test]
async fn test_group_create_payload_and_integer_id() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "10")]).await;
    let team = group("team", &[&u1]);

    Mock::given(method("POST"))
        .and(path("/Groups"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(group_document(json!(5), "team", Value::Null)),
        )
        .expect(1)
        .mount(&target.server)
        .await;
    mount_group(
        &target,
        "5",
        group_document(json!(5), "team", members(&[json!(10)])),
    )
    .await;
    mount_patch(&target, "5", 0).await;

    let connection = target.groups().create(&team).await.unwrap();
    assert_eq!(connection.remote_id, "5");
    assert_eq!(connection.resource_type, ResourceKind::Group);

    let body: Value = target.received("POST").await[0].body_json().unwrap();
    assert_eq!(
        body,
        json!({
            "schemas": [GROUP_SCHEMA],
            "externalId": team.id.to_string(),
            "displayName": "team",
        })
    );
}

#[tokio::test]
async fn test_group_create_reconciles_members() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "10")]).await;
    let team = group("team", &[&u1]);

    Mock::given(method("POST"))
        .and(path("/Groups"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(group_document_without_members(json!("g9"), "team")),
        )
        .mount(&target.server)
        .await;
    mount_group(&target, "g9", group_document_without_members(json!("g9"), "team")).await;
    mount_patch(&target, "g9", 1).await;

    target.groups().create(&team).await.unwrap();

    let body: Value = target.received("PATCH").await[0].body_json().unwrap();
    assert_eq!(body["Operations"][0]["op"], "add");
    assert_eq!(body["Operations"][0]["value"], json!([{"value": "10"}]));
}

#[tokio::test]
async fn test_group_write_survives_membership_failure() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "10")]).await;
    let team = group("team", &[&u1]);
    let existing = target.connect(ResourceKind::Group, team.id, "g1").await;

    Mock::given(method("PUT"))
        .and(path("/Groups/g1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(group_document(json!("g1"), "team", json!([]))),
        )
        .expect(1)
        .mount(&target.server)
        .await;
    mount_group(&target, "g1", group_document(json!("g1"), "team", json!([]))).await;
    Mock::given(method("PATCH"))
        .and(path("/Groups/g1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&target.server)
        .await;

    let updated = target.groups().update(&team, &existing).await.unwrap();
    assert_eq!(updated.remote_id, "g1");

    // The replace payload never carries members.
    let body: Value = target.received("PUT").await[0].body_json().unwrap();
    assert!(body.get("members").is_none());
    assert_eq!(body["id"], "g1");
}

#[tokio::test]
async fn test_group_delete() {
    let target = TestTarget::start().await;
    let team = group("team", &[]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    Mock::given(method("DELETE"))
        .and(path("/Groups/g1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&target.server)
        .await;

    assert!(target.groups().delete(&team).await.unwrap());
    assert!(target.connection(ResourceKind::Group, team.id).await.is_none());
}

// =============================================================================
// Incremental membership changes
// =============================================================================

#[tokio::test]
async fn test_add_members_patches_without_reading_group() {
    let target = TestTarget::start().await;
    let (u1, u2) = (user("u1"), user("u2"));
    connect_users(&target, &[(&u1, "1"), (&u2, "2")]).await;
    let team = group("team", &[&u1, &u2]);
    target.connect(ResourceKind::Group, team.id, "g1").await;
    mount_patch(&target, "g1", 1).await;

    let change = target
        .groups()
        .add_members(&team, &[u2.id])
        .await
        .unwrap();
    assert_eq!(
        change,
        MembershipChange::Patched {
            added: ids(&["2"]),
            removed: BTreeSet::new(),
            response: None,
        }
    );
    assert!(target.received("GET").await.is_empty());
}

#[tokio::test]
async fn test_remove_members_patches_removal_only() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "1")]).await;
    let team = group("team", &[]);
    target.connect(ResourceKind::Group, team.id, "g1").await;
    mount_patch(&target, "g1", 1).await;

    target
        .groups()
        .remove_members(&team, &[u1.id])
        .await
        .unwrap();

    let body: Value = target.received("PATCH").await[0].body_json().unwrap();
    assert_eq!(
        body["Operations"],
        json!([{"op": "remove", "path": "members", "value": [{"value": "1"}]}])
    );
}

#[tokio::test]
async fn test_add_members_of_unsynced_users_sends_nothing() {
    let target = TestTarget::start().await;
    let u1 = user("u1");
    let team = group("team", &[&u1]);
    target.connect(ResourceKind::Group, team.id, "g1").await;
    mount_patch(&target, "g1", 0).await;

    let change = target
        .groups()
        .add_members(&team, &[u1.id])
        .await
        .unwrap();
    assert_eq!(change, MembershipChange::Unchanged);
}

#[tokio::test]
async fn test_add_members_without_patch_support_reconciles() {
    let target = TestTarget::start_with(ServiceProviderConfig::default()).await;
    let u1 = user("u1");
    connect_users(&target, &[(&u1, "1")]).await;
    let team = group("team", &[&u1]);
    target.connect(ResourceKind::Group, team.id, "g1").await;

    mount_group(&target, "g1", group_document(json!("g1"), "team", members(&[json!(1)]))).await;
    mount_patch(&target, "g1", 0).await;

    let change = target
        .groups()
        .add_members(&team, &[u1.id])
        .await
        .unwrap();
    assert_eq!(change, MembershipChange::Unchanged);
    assert_eq!(target.received("GET").await.len(), 1);
}

//! End-to-end reconcile scenarios through the controller.
//!
//! - Two snippets writing disjoint keys, then one deleted.
//! - Protected node entries surviving every merge and deletion.
//! - Declaration edits releasing exactly the dropped keys.
//! - Drift repair after an out-of-band edit.
//! - Validation failures isolated to the offending snippet.
//! - Collision precedence and hand-over on deletion.
//! - Namespace filtering.

mod common;

use std::sync::Arc;

use authmap::controller::{Event, NamespaceFilter, Submission};
use authmap::snippets::SnippetStore;
use authmap_core::model::{CollisionHolder, EntryKind, MappingEntry};
use authmap_core::store::{MemoryTableStore, SharedResourceClient};
use authmap_core::version::Generation;

use common::{Harness, ROLE_X, USER_Y, delete, role, upsert};

// ---------------------------------------------------------------------------
// Core lifecycle
// ---------------------------------------------------------------------------

#[test]
fn two_snippets_then_delete_one() {
    // One worker so the two writes land as generations 1 and 2.
    let h = Harness::with(
        1,
        NamespaceFilter::default(),
        Arc::new(MemoryTableStore::default()),
    );
    h.submit(upsert("ns/a", vec![role(ROLE_X, "rbacA", &["g1"])], vec![]));
    h.submit(upsert("ns/b", vec![], vec![role(USER_Y, "rbacB", &["g2"])]));
    h.settle();

    let table = h.table();
    assert_eq!(table.generation, Generation::new(2));
    assert_eq!(table.roles[ROLE_X], MappingEntry::new(ROLE_X, "rbacA", &["g1"]));
    assert_eq!(table.users[USER_Y], MappingEntry::new(USER_Y, "rbacB", &["g2"]));

    let a = h.snippet("ns/a").unwrap();
    assert!(a.status.is_synced);
    assert!(a.status.owns(EntryKind::Role, ROLE_X));
    let b = h.snippet("ns/b").unwrap();
    assert!(b.status.owns(EntryKind::User, USER_Y));

    h.submit(delete("ns/a"));
    h.settle();

    let table = h.table();
    assert!(table.roles.is_empty());
    assert_eq!(table.users[USER_Y].rbac_name, "rbacB");
    assert_eq!(table.generation, Generation::new(3));
    assert!(h.snippet("ns/a").is_none());
}

#[test]
fn protected_entries_survive() {
    let table = Arc::new(MemoryTableStore::default());
    table.bootstrap().unwrap();
    let node = "arn:aws:iam::111122223333:role/node";
    table
        .edit(|t| {
            t.upsert(
                EntryKind::Role,
                MappingEntry::new(node, "system:node:{{EC2PrivateDNSName}}", &["system:nodes"]),
            );
        })
        .unwrap();
    let h = Harness::with(2, NamespaceFilter::default(), table);

    h.submit(upsert("ns/a", vec![role(ROLE_X, "rbacA", &[])], vec![]));
    h.submit(upsert("ns/evil", vec![role(node, "hijack", &[])], vec![]));
    h.settle();

    let evil = h.snippet("ns/evil").unwrap();
    assert!(!evil.status.is_synced);
    assert_eq!(evil.status.collisions[0].holder, CollisionHolder::Protected);

    h.submit(delete("ns/a"));
    h.submit(delete("ns/evil"));
    h.settle();

    let t = h.table();
    assert_eq!(t.len(), 1);
    assert!(t.roles[node].rbac_name.starts_with("system:node:"));
}

#[test]
fn dropping_an_entry_releases_only_that_key() {
    let h = Harness::start();
    let other = "arn:aws:iam::111122223333:role/Other";
    h.submit(upsert(
        "ns/a",
        vec![role(ROLE_X, "x", &[]), role(other, "o", &[])],
        vec![],
    ));
    h.settle();
    h.submit(upsert("ns/a", vec![role(other, "o", &["new"])], vec![]));
    h.settle();

    let t = h.table();
    assert!(t.get(EntryKind::Role, ROLE_X).is_none());
    assert_eq!(t.roles[other].groups, vec!["new".to_owned()]);
    let a = h.snippet("ns/a").unwrap();
    assert_eq!(a.status.role_arns.len(), 1);
}

#[test]
fn unchanged_redelivery_does_not_write() {
    let h = Harness::start();
    let event = upsert("ns/a", vec![role(ROLE_X, "rbacA", &[])], vec![]);
    h.submit(event.clone());
    h.settle();
    let writes = h.table.write_count();

    h.submit(event.clone());
    h.submit(event);
    h.settle();
    assert_eq!(h.table.write_count(), writes);
    assert_eq!(h.table().generation, Generation::new(1));
}

// ---------------------------------------------------------------------------
// Drift, validation, partial failure
// ---------------------------------------------------------------------------

#[test]
fn resync_repairs_drift() {
    let h = Harness::start();
    h.submit(upsert("ns/a", vec![role(ROLE_X, "rbacA", &["g1"])], vec![]));
    h.settle();

    h.table
        .edit(|t| {
            t.remove(EntryKind::Role, ROLE_X);
        })
        .unwrap();
    h.submit(Event::Resync {
        id: common::id("ns/a"),
    });
    h.settle();

    assert_eq!(h.table().roles[ROLE_X].rbac_name, "rbacA");
    assert!(h.snippet("ns/a").unwrap().status.is_synced);
}

#[test]
fn invalid_snippet_does_not_block_others() {
    let h = Harness::start();
    h.submit(upsert("ns/bad", vec![role("arn:aws:s3:::bucket", "x", &[])], vec![]));
    h.submit(upsert("ns/good", vec![role(ROLE_X, "rbacA", &[])], vec![]));
    h.settle();

    let bad = h.snippet("ns/bad").unwrap();
    assert!(!bad.status.is_synced);
    assert!(bad.status.message.is_some());
    assert!(h.snippet("ns/good").unwrap().status.is_synced);
    assert_eq!(h.table().len(), 1);
}

#[test]
fn fixing_an_invalid_snippet_syncs_it() {
    let h = Harness::start();
    h.submit(upsert("ns/a", vec![role(ROLE_X, "", &[])], vec![]));
    h.settle();
    assert!(!h.snippet("ns/a").unwrap().status.is_synced);

    h.submit(upsert("ns/a", vec![role(ROLE_X, "rbacA", &[])], vec![]));
    h.settle();
    let a = h.snippet("ns/a").unwrap();
    assert!(a.status.is_synced);
    assert_eq!(a.status.message, None);
}

#[test]
fn status_write_failure_is_healed() {
    let h = Harness::start();
    h.snippets.fail_status_updates(3);
    h.submit(upsert("ns/a", vec![role(ROLE_X, "rbacA", &[])], vec![]));
    h.settle();

    let a = h.snippet("ns/a").unwrap();
    assert!(a.status.is_synced);
    assert!(a.status.owns(EntryKind::Role, ROLE_X));
    assert_eq!(h.table.write_count(), 1);
}

// ---------------------------------------------------------------------------
// Collisions
// ---------------------------------------------------------------------------

#[test]
fn smallest_identity_wins_and_hands_over_on_delete() {
    let h = Harness::start();
    h.submit(upsert("team-b/x", vec![role(ROLE_X, "from-b", &[])], vec![]));
    h.submit(upsert("team-a/x", vec![role(ROLE_X, "from-a", &[])], vec![]));
    h.settle();

    assert_eq!(h.table().roles[ROLE_X].rbac_name, "from-a");
    let a = h.snippet("team-a/x").unwrap();
    let b = h.snippet("team-b/x").unwrap();
    assert!(a.status.is_synced);
    assert!(!b.status.is_synced);
    assert!(b.status.role_arns.is_empty());
    assert_eq!(
        b.status.collisions[0].holder,
        CollisionHolder::Snippet(common::id("team-a/x"))
    );

    h.submit(delete("team-a/x"));
    h.settle();

    assert_eq!(h.table().roles[ROLE_X].rbac_name, "from-b");
    let b = h.snippet("team-b/x").unwrap();
    assert!(b.status.is_synced);
    assert!(b.status.collisions.is_empty());
}

// ---------------------------------------------------------------------------
// Namespace filter
// ---------------------------------------------------------------------------

#[test]
fn only_watched_namespaces_are_reconciled() {
    let h = Harness::with(
        2,
        NamespaceFilter::new(["team-a"]),
        Arc::new(MemoryTableStore::default()),
    );
    h.submit(upsert("team-a/x", vec![role(ROLE_X, "a", &[])], vec![]));
    let sub = h
        .controller
        .submit(upsert("team-b/y", vec![], vec![role(USER_Y, "b", &[])]))
        .unwrap();
    assert_eq!(sub, Submission::Filtered);
    h.settle();

    assert_eq!(h.table().len(), 1);
    assert!(h.snippets.get(&common::id("team-b/y")).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Deletion edge cases
// ---------------------------------------------------------------------------

#[test]
fn deleting_unknown_snippet_is_harmless() {
    let h = Harness::start();
    h.submit(delete("ns/ghost"));
    h.settle();
    assert!(h.snippet("ns/ghost").is_none());
    assert!(h.table.snapshot().is_err(), "nothing should create the table");
}

#[test]
fn deleting_rejected_snippet_drops_it_without_write() {
    let h = Harness::start();
    h.submit(upsert("ns/bad", vec![role("nope", "x", &[])], vec![]));
    h.settle();
    h.submit(delete("ns/bad"));
    h.settle();
    assert!(h.snippet("ns/bad").is_none());
    assert_eq!(h.table.write_count(), 0);
}

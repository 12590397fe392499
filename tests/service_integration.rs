//! Integration tests for branch service operations: track, untrack,
//! rename, create, and their graph invariants.

mod common;

use common::{branch, init_store, track_with_base, TestRepo};

use strata::graph::BranchGraph;
use strata::service::{self, ServiceError};
use strata::state::{ChangeBinding, Store};

/// main <- a <- b <- c with one commit each, all tracked.
fn stacked_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.branch_from("a", "main");
    repo.commit_file("a.txt", "a\n", "add a");
    repo.branch_from("b", "a");
    repo.commit_file("b.txt", "b\n", "add b");
    repo.branch_from("c", "b");
    repo.commit_file("c.txt", "c\n", "add c");

    let git = repo.git();
    let mut store = init_store(&git);
    track_with_base(&git, &mut store, "a", "main");
    track_with_base(&git, &mut store, "b", "a");
    track_with_base(&git, &mut store, "c", "b");
    repo
}

// =============================================================================
// Track
// =============================================================================

#[test]
fn track_records_base_and_reaches_trunk() {
    let repo = TestRepo::new();
    repo.branch_from("feat", "main");
    repo.commit_file("feat.txt", "feat\n", "add feat");

    let git = repo.git();
    let mut store = init_store(&git);
    let chosen = service::track(&git, &mut store, &branch("feat"), Some(branch("main"))).unwrap();
    assert_eq!(chosen, branch("main"));

    let record = store.lookup_branch(&branch("feat")).unwrap();
    assert_eq!(record.base, branch("main"));

    // Downstack from the branch ends at trunk.
    let graph = BranchGraph::load(&store).unwrap();
    let downstack = graph.downstack(&branch("feat")).unwrap();
    assert_eq!(downstack, vec![branch("feat")]);
}

#[test]
fn track_infers_nearest_tracked_ancestor() {
    let repo = TestRepo::new();
    repo.branch_from("a", "main");
    repo.commit_file("a.txt", "a\n", "add a");
    repo.branch_from("b", "a");
    repo.commit_file("b.txt", "b\n", "add b");

    let git = repo.git();
    let mut store = init_store(&git);
    track_with_base(&git, &mut store, "a", "main");

    // b forked from a, which is nearer than trunk.
    let chosen = service::track(&git, &mut store, &branch("b"), None).unwrap();
    assert_eq!(chosen, branch("a"));
}

#[test]
fn track_falls_back_to_trunk() {
    let repo = TestRepo::new();
    repo.branch_from("lone", "main");
    repo.commit_file("lone.txt", "lone\n", "add lone");

    let git = repo.git();
    let mut store = init_store(&git);
    let chosen = service::track(&git, &mut store, &branch("lone"), None).unwrap();
    assert_eq!(chosen, branch("main"));
}

#[test]
fn track_rejects_duplicates_and_trunk() {
    let repo = stacked_repo();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    assert!(matches!(
        service::track(&git, &mut store, &branch("a"), None),
        Err(ServiceError::AlreadyTracked(_))
    ));
    assert!(matches!(
        service::track(&git, &mut store, &branch("main"), None),
        Err(ServiceError::TrunkNotTrackable(_))
    ));
    assert!(matches!(
        service::track(&git, &mut store, &branch("ghost"), None),
        Err(ServiceError::NoSuchBranch(_))
    ));
}

#[test]
fn track_rejects_untracked_base() {
    let repo = TestRepo::new();
    repo.branch_from("feat", "main");
    repo.commit_file("feat.txt", "feat\n", "add feat");
    repo.branch_from("other", "main");

    let git = repo.git();
    let mut store = init_store(&git);
    assert!(matches!(
        service::track(&git, &mut store, &branch("feat"), Some(branch("other"))),
        Err(ServiceError::UntrackedBase(_))
    ));
}

// =============================================================================
// Untrack
// =============================================================================

#[test]
fn untrack_reparents_children() {
    let repo = stacked_repo();
    repo.checkout("main");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    service::untrack(&git, &mut store, &branch("b")).unwrap();

    // No record references b; c now sits on b's former base.
    let store = Store::open(&git).unwrap();
    assert!(store.lookup_branch(&branch("b")).is_err());
    assert_eq!(store.lookup_branch(&branch("c")).unwrap().base, branch("a"));
    for (_, record) in store.list_branches() {
        assert_ne!(record.base, branch("b"));
    }
}

#[test]
fn untrack_refuses_current_branch() {
    let repo = stacked_repo();
    repo.checkout("b");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    assert!(matches!(
        service::untrack(&git, &mut store, &branch("b")),
        Err(ServiceError::CheckedOut(_))
    ));
}

#[test]
fn track_untrack_roundtrip_restores_graph() {
    let repo = TestRepo::new();
    repo.branch_from("a", "main");
    repo.commit_file("a.txt", "a\n", "add a");
    repo.checkout("main");
    repo.branch_from("feat", "main");
    repo.commit_file("feat.txt", "feat\n", "add feat");
    repo.checkout("main");

    let git = repo.git();
    let mut store = init_store(&git);
    track_with_base(&git, &mut store, "a", "main");

    let before: Vec<_> = store
        .list_branches()
        .map(|(name, record)| (name.clone(), record.clone()))
        .collect();

    service::track(&git, &mut store, &branch("feat"), Some(branch("main"))).unwrap();
    service::untrack(&git, &mut store, &branch("feat")).unwrap();

    let after: Vec<_> = store
        .list_branches()
        .map(|(name, record)| (name.clone(), record.clone()))
        .collect();
    assert_eq!(before, after);
}

// =============================================================================
// Rename
// =============================================================================

#[test]
fn rename_propagates_to_children_and_vcs() {
    let repo = stacked_repo();
    repo.checkout("main");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    // Give a a change binding to verify it survives.
    let mut record = store.lookup_branch(&branch("a")).unwrap().clone();
    record.change = Some(ChangeBinding {
        forge: "shamhub".to_string(),
        number: 7,
        url: "https://shamhub.invalid/changes/7".to_string(),
        nav_comment_id: None,
    });
    let mut tx = store.begin_update();
    tx.upsert_branch(branch("a"), record);
    tx.commit("bind a").unwrap();

    service::rename(&git, &mut store, &branch("a"), &branch("a2")).unwrap();

    let store = Store::open(&git).unwrap();
    // Exactly one record exists at the new name.
    assert!(store.lookup_branch(&branch("a")).is_err());
    let renamed = store.lookup_branch(&branch("a2")).unwrap();
    assert_eq!(renamed.base, branch("main"));
    assert_eq!(renamed.change.as_ref().unwrap().number, 7);

    // Children follow, the VCS ref moved.
    assert_eq!(store.lookup_branch(&branch("b")).unwrap().base, branch("a2"));
    assert!(git.branch_exists(&branch("a2")));
    assert!(!git.branch_exists(&branch("a")));
}

#[test]
fn rename_rejects_existing_target() {
    let repo = stacked_repo();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    assert!(matches!(
        service::rename(&git, &mut store, &branch("a"), &branch("b")),
        Err(ServiceError::TargetExists(_))
    ));
}

// =============================================================================
// Create
// =============================================================================

#[test]
fn create_stacks_on_current_tracked_branch() {
    let repo = stacked_repo();
    repo.checkout("b");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let base = service::create(&git, &mut store, &branch("d"), None).unwrap();

    assert_eq!(base, branch("b"));
    assert_eq!(git.current_branch().unwrap(), Some(branch("d")));
    assert_eq!(store.lookup_branch(&branch("d")).unwrap().base, branch("b"));
}

#[test]
fn create_defaults_to_trunk_from_untracked() {
    let repo = TestRepo::new();
    let git = repo.git();
    let mut store = init_store(&git);

    let base = service::create(&git, &mut store, &branch("feat"), None).unwrap();
    assert_eq!(base, branch("main"));
}

//! Integration tests for the restack engine on real repositories:
//! dependency-ordered rebases, no-op detection, and conflict pause/resume
//! across process-like boundaries.

mod common;

use common::{branch, init_store, track_with_base, TestRepo};

use strata::restack::{continue_restack, restack, Request, RestackError, Scope};
use strata::state::Store;
use strata::ui::Verbosity;

/// Build main <- a <- b <- c, each with one file, then advance main.
///
/// Returns the repo with all three branches tracked at their fork points.
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

fn advance_trunk(repo: &TestRepo) {
    repo.checkout("main");
    repo.commit_file("trunk.txt", "trunk\n", "advance trunk");
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn upstack_restack_rebases_in_dependency_order() {
    let repo = stacked_repo();
    advance_trunk(&repo);
    repo.checkout("a");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let count = restack(
        &git,
        &mut store,
        &Request {
            branch: branch("a"),
            scope: Scope::Upstack,
            continue_command: "strata upstack restack --continue".to_string(),
        },
        Verbosity::Quiet,
    )
    .unwrap();
    assert_eq!(count, 3);

    // Every branch's recorded base hash equals the tip of its base.
    let store = Store::open(&git).unwrap();
    for (name, base) in [("a", "main"), ("b", "a"), ("c", "b")] {
        let record = store.lookup_branch(&branch(name)).unwrap();
        assert_eq!(
            record.base_hash,
            repo.head(base),
            "{name} should be aligned to {base}"
        );
    }

    // Trunk's new commit is reachable from the leaf.
    let git = repo.git();
    let merge_base = git
        .merge_base(&repo.head("c"), &repo.head("main"))
        .unwrap()
        .unwrap();
    assert_eq!(merge_base, repo.head("main"));
}

#[test]
fn restack_is_a_noop_when_aligned() {
    let repo = stacked_repo();
    advance_trunk(&repo);
    repo.checkout("a");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let request = Request {
        branch: branch("a"),
        scope: Scope::Upstack,
        continue_command: "strata upstack restack --continue".to_string(),
    };
    assert_eq!(
        restack(&git, &mut store, &request, Verbosity::Quiet).unwrap(),
        3
    );

    // Second run finds nothing to do.
    assert_eq!(
        restack(&git, &mut store, &request, Verbosity::Quiet).unwrap(),
        0
    );
}

#[test]
fn branch_scope_restacks_only_the_branch() {
    let repo = stacked_repo();
    advance_trunk(&repo);

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let count = restack(
        &git,
        &mut store,
        &Request {
            branch: branch("a"),
            scope: Scope::Branch,
            continue_command: "strata branch restack --continue".to_string(),
        },
        Verbosity::Quiet,
    )
    .unwrap();
    assert_eq!(count, 1);

    // b's recorded base hash still points at a's old tip.
    let record = store.lookup_branch(&branch("b")).unwrap();
    assert_ne!(record.base_hash, repo.head("a"));
}

#[test]
fn upstack_exclusive_skips_the_start() {
    let repo = stacked_repo();
    advance_trunk(&repo);

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let count = restack(
        &git,
        &mut store,
        &Request {
            branch: branch("a"),
            scope: Scope::UpstackExclusive,
            continue_command: "strata upstack restack --continue".to_string(),
        },
        Verbosity::Quiet,
    )
    .unwrap();

    // a itself is skipped; b and c are still aligned to a's unchanged
    // tip, so nothing needed a rebase.
    assert_eq!(count, 0);
    let record = store.lookup_branch(&branch("a")).unwrap();
    assert_ne!(record.base_hash, repo.head("main"));
}

#[test]
fn autostash_preserves_dirty_worktree() {
    let repo = stacked_repo();
    advance_trunk(&repo);
    repo.checkout("c");

    // Uncommitted change on the branch being restacked.
    std::fs::write(repo.path().join("dirty.txt"), "wip\n").unwrap();

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    restack(
        &git,
        &mut store,
        &Request {
            branch: branch("a"),
            scope: Scope::Upstack,
            continue_command: "strata upstack restack --continue".to_string(),
        },
        Verbosity::Quiet,
    )
    .unwrap();

    // The worktree change survived the rebases.
    assert!(repo.path().join("dirty.txt").exists());
    assert_eq!(
        std::fs::read_to_string(repo.path().join("dirty.txt")).unwrap(),
        "wip\n"
    );
}

// =============================================================================
// Conflict pause and resume
// =============================================================================

/// main and b both edit the same file, so rebasing b conflicts.
fn conflicting_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.commit_file("shared.txt", "base\n", "add shared");
    repo.branch_from("a", "main");
    repo.commit_file("a.txt", "a\n", "add a");
    repo.branch_from("b", "a");
    repo.commit_file("shared.txt", "from b\n", "b edits shared");
    repo.branch_from("c", "b");
    repo.commit_file("c.txt", "c\n", "add c");

    let git = repo.git();
    let mut store = init_store(&git);
    track_with_base(&git, &mut store, "a", "main");
    track_with_base(&git, &mut store, "b", "a");
    track_with_base(&git, &mut store, "c", "b");

    repo.checkout("main");
    repo.commit_file("shared.txt", "from main\n", "main edits shared");
    repo
}

#[test]
fn conflict_pauses_with_continuation_and_resumes() {
    let repo = conflicting_repo();
    repo.checkout("a");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let request = Request {
        branch: branch("a"),
        scope: Scope::Upstack,
        continue_command: "strata upstack restack --continue".to_string(),
    };

    // First run: a succeeds, b conflicts.
    let err = restack(&git, &mut store, &request, Verbosity::Quiet).unwrap_err();
    match &err {
        RestackError::Conflict {
            branch: conflicted,
            continue_command,
        } => {
            assert_eq!(conflicted.as_str(), "b");
            assert_eq!(continue_command, "strata upstack restack --continue");
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    // The continuation names the paused branch first, the rest after.
    let store = Store::open(&git).unwrap();
    let continuation = store.continuation().unwrap();
    assert_eq!(continuation.command, "strata upstack restack --continue");
    assert_eq!(
        continuation
            .remaining
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>(),
        ["b", "c"]
    );
    // a completed before the pause.
    assert_eq!(
        store.lookup_branch(&branch("a")).unwrap().base_hash,
        repo.head("main")
    );

    // User resolves the conflict and finishes the rebase.
    std::fs::write(repo.path().join("shared.txt"), "resolved\n").unwrap();
    repo.git_ok(&["add", "shared.txt"]);
    repo.git_ok(&[
        "-c",
        "core.editor=true",
        "rebase",
        "--continue",
    ]);

    // Continue: b is recorded, c is rebased, continuation cleared.
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let count = continue_restack(&git, &mut store, Verbosity::Quiet).unwrap();
    assert_eq!(count, 2);

    let store = Store::open(&git).unwrap();
    assert!(store.continuation().is_none());
    assert_eq!(
        store.lookup_branch(&branch("b")).unwrap().base_hash,
        repo.head("a")
    );
    assert_eq!(
        store.lookup_branch(&branch("c")).unwrap().base_hash,
        repo.head("b")
    );
}

#[test]
fn continue_without_pause_fails() {
    let repo = stacked_repo();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    assert!(matches!(
        continue_restack(&git, &mut store, Verbosity::Quiet),
        Err(RestackError::NothingInProgress)
    ));
}

#[test]
fn continue_refuses_while_rebase_unresolved() {
    let repo = conflicting_repo();
    repo.checkout("a");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let request = Request {
        branch: branch("a"),
        scope: Scope::Upstack,
        continue_command: "strata upstack restack --continue".to_string(),
    };
    restack(&git, &mut store, &request, Verbosity::Quiet).unwrap_err();

    // The rebase is still mid-conflict; continue must refuse.
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    assert!(matches!(
        continue_restack(&git, &mut store, Verbosity::Quiet),
        Err(RestackError::RebaseStillInProgress)
    ));

    // Clean up the in-progress rebase for the temp dir teardown.
    repo.git_ok(&["rebase", "--abort"]);
}

// =============================================================================
// Edge policies
// =============================================================================

#[test]
fn deleted_base_reparents_onto_trunk() {
    let repo = stacked_repo();
    // Delete a out from under b.
    repo.checkout("main");
    repo.git_ok(&["branch", "-D", "a"]);

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    restack(
        &git,
        &mut store,
        &Request {
            branch: branch("b"),
            scope: Scope::Upstack,
            continue_command: "strata upstack restack --continue".to_string(),
        },
        Verbosity::Quiet,
    )
    .unwrap();

    let store = Store::open(&git).unwrap();
    assert_eq!(
        store.lookup_branch(&branch("b")).unwrap().base,
        branch("main")
    );
}

#[test]
fn repo_restack_covers_all_roots() {
    let repo = TestRepo::new();
    repo.branch_from("x", "main");
    repo.commit_file("x.txt", "x\n", "add x");
    repo.checkout("main");
    repo.branch_from("y", "main");
    repo.commit_file("y.txt", "y\n", "add y");

    let git = repo.git();
    let mut store = init_store(&git);
    track_with_base(&git, &mut store, "x", "main");
    track_with_base(&git, &mut store, "y", "main");

    repo.checkout("main");
    repo.commit_file("trunk.txt", "trunk\n", "advance trunk");

    let git = repo.git();
    let mut store = Store::open(&git).unwrap();
    let count = strata::restack::restack_repo(
        &git,
        &mut store,
        "strata repo restack --continue",
        Verbosity::Quiet,
    )
    .unwrap();
    assert_eq!(count, 2);
}

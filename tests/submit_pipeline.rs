//! Integration tests for the submit pipeline: bottom-up creation, record
//! binding, navigation comments, and idempotent resubmission. Pushes land
//! in a local bare remote; the forge is ShamHub.

mod common;

use common::{branch, init_store, track_with_base, TestRepo};

use strata::forge::shamhub::{Operation, ShamHub};
use strata::forge::{ChangeId, Repository};
use strata::state::Store;
use strata::submit::nav_comment::NAV_COMMENT_SENTINEL;
use strata::submit::{submit_branches, SubmitOptions};
use strata::ui::Verbosity;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// main <- a <- b tracked, with a bare origin to push to and an empty
/// ShamHub knowing only trunk.
fn submit_fixture() -> (TestRepo, ShamHub) {
    let repo = TestRepo::new();
    repo.add_origin();
    repo.branch_from("a", "main");
    repo.commit_file("a.txt", "a\n", "feature a");
    repo.branch_from("b", "a");
    repo.commit_file("b.txt", "b\n", "feature b");

    let git = repo.git();
    let mut store = init_store(&git);
    track_with_base(&git, &mut store, "a", "main");
    track_with_base(&git, &mut store, "b", "a");

    let forge = ShamHub::new();
    forge.add_branch("main");
    (repo, forge)
}

#[test]
fn submits_stack_bottom_up_and_binds_records() {
    let (repo, forge) = submit_fixture();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    let batch = [branch("a"), branch("b")];
    let outcome = block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &SubmitOptions::default(),
        Verbosity::Quiet,
    ))
    .unwrap();

    assert_eq!(outcome.created, 2);
    assert_eq!(outcome.updated, 0);

    // Creations happened bottom-up: a (onto main) before b (onto a).
    let submits: Vec<_> = forge
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            Operation::Submit { head, base } => Some((head, base)),
            _ => None,
        })
        .collect();
    assert_eq!(
        submits,
        [
            ("a".to_string(), "main".to_string()),
            ("b".to_string(), "a".to_string())
        ]
    );

    // Records are bound, subjects came from the tip commits.
    let store = Store::open(&git).unwrap();
    let bound = store.lookup_branch(&branch("a")).unwrap();
    assert_eq!(bound.change.as_ref().unwrap().number, 1);
    let info = block_on(forge.find_change_by_id(ChangeId(1))).unwrap();
    assert_eq!(info.subject, "feature a");

    // Branches landed on the remote.
    let output = std::process::Command::new("git")
        .args(["branch", "--list", "a", "b"])
        .current_dir(repo.path().parent().unwrap().join("origin.git"))
        .output()
        .unwrap();
    let listing = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(listing.contains('a') && listing.contains('b'));
}

#[test]
fn posts_navigation_comments_on_every_change() {
    let (repo, forge) = submit_fixture();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    let batch = [branch("a"), branch("b")];
    let outcome = block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &SubmitOptions::default(),
        Verbosity::Quiet,
    ))
    .unwrap();
    assert_eq!(outcome.comments, 2);

    for number in [1u64, 2] {
        let comments = forge.comments(ChangeId(number));
        assert_eq!(comments.len(), 1, "change #{number} should carry one comment");
        let body = &comments[0].1;
        assert!(body.starts_with(NAV_COMMENT_SENTINEL));
        assert!(body.contains("Merges into `main`."));
        // Both stack entries are listed.
        assert!(body.contains("#1") && body.contains("#2"));
    }

    // Comment ids were recorded.
    let store = Store::open(&git).unwrap();
    for name in ["a", "b"] {
        let record = store.lookup_branch(&branch(name)).unwrap();
        assert!(record.change.as_ref().unwrap().nav_comment_id.is_some());
    }
}

#[test]
fn resubmit_is_idempotent() {
    let (repo, forge) = submit_fixture();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    let batch = [branch("a"), branch("b")];
    let opts = SubmitOptions::default();
    block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &opts,
        Verbosity::Quiet,
    ))
    .unwrap();

    let writes_before = write_count(&forge);
    let outcome = block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &opts,
        Verbosity::Quiet,
    ))
    .unwrap();

    // Nothing changed, so no forge writes happened the second time.
    assert_eq!(outcome, strata::submit::SubmitOutcome::default());
    assert_eq!(write_count(&forge), writes_before);
}

/// Count mutating operations recorded by ShamHub.
fn write_count(forge: &ShamHub) -> usize {
    forge
        .operations()
        .iter()
        .filter(|op| {
            matches!(
                op,
                Operation::Submit { .. }
                    | Operation::Edit { .. }
                    | Operation::PostComment { .. }
                    | Operation::UpdateComment { .. }
                    | Operation::DeleteComment { .. }
            )
        })
        .count()
}

#[test]
fn update_only_skips_unsubmitted_branches() {
    let (repo, forge) = submit_fixture();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    let batch = [branch("a")];
    let outcome = block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &SubmitOptions {
            update_only: true,
            ..Default::default()
        },
        Verbosity::Quiet,
    ))
    .unwrap();

    assert_eq!(outcome.created, 0);
    assert!(store.lookup_branch(&branch("a")).unwrap().change.is_none());
}

#[test]
fn dry_run_touches_nothing() {
    let (repo, forge) = submit_fixture();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    let batch = [branch("a"), branch("b")];
    let outcome = block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &SubmitOptions {
            dry_run: true,
            ..Default::default()
        },
        Verbosity::Quiet,
    ))
    .unwrap();

    assert_eq!(outcome, strata::submit::SubmitOutcome::default());
    assert!(forge.operations().is_empty());
    assert!(store.lookup_branch(&branch("a")).unwrap().change.is_none());
}

#[test]
fn retarget_happens_when_base_drifts() {
    let (repo, forge) = submit_fixture();
    let git = repo.git();
    let mut store = Store::open(&git).unwrap();

    let batch = [branch("a"), branch("b")];
    block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &SubmitOptions::default(),
        Verbosity::Quiet,
    ))
    .unwrap();

    // The forge-side base of b drifts; resubmission reconciles it.
    block_on(forge.edit_change(
        ChangeId(2),
        strata::forge::EditChangeOptions {
            base: Some("main".to_string()),
            ..Default::default()
        },
    ))
    .unwrap();

    let outcome = block_on(submit_branches(
        &git,
        &mut store,
        &forge,
        &batch,
        &SubmitOptions::default(),
        Verbosity::Quiet,
    ))
    .unwrap();
    assert_eq!(outcome.updated, 1);

    let info = block_on(forge.find_change_by_id(ChangeId(2))).unwrap();
    assert_eq!(info.base, "a");
}

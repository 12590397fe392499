//! Repository-contract tests against the in-process ShamHub forge.

use regex::Regex;

use strata::forge::shamhub::{FailOn, Operation, ShamHub};
use strata::forge::{
    ChangeId, ChangeState, EditChangeOptions, ForgeError, ListChangeCommentsOptions, Repository,
    SubmitChangeRequest,
};

fn request(head: &str, base: &str) -> SubmitChangeRequest {
    SubmitChangeRequest {
        subject: format!("change {head}"),
        body: String::new(),
        base: base.to_string(),
        head: head.to_string(),
        draft: false,
        reviewers: vec![],
        labels: vec![],
    }
}

async fn stack_of_three(forge: &ShamHub) -> Vec<ChangeId> {
    forge.add_branch("main");
    let mut ids = Vec::new();
    for (head, base) in [("a", "main"), ("b", "a"), ("c", "b")] {
        let change = forge.submit_change(request(head, base)).await.unwrap();
        ids.push(change.id);
    }
    ids
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn submit_assigns_sequential_ids() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    assert_eq!(ids, vec![ChangeId(1), ChangeId(2), ChangeId(3)]);
}

#[tokio::test]
async fn submit_against_unknown_base_fails() {
    let forge = ShamHub::new();
    forge.add_branch("main");

    // "b" targets "a" before "a" was ever submitted.
    let err = forge.submit_change(request("b", "a")).await.unwrap_err();
    match err {
        ForgeError::UnsubmittedBase(base) => assert_eq!(base, "a"),
        other => panic!("expected UnsubmittedBase, got {other:?}"),
    }
}

#[tokio::test]
async fn edit_change_is_idempotent() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;

    let opts = EditChangeOptions {
        base: Some("main".to_string()),
        ..Default::default()
    };
    forge.edit_change(ids[1], opts.clone()).await.unwrap();
    forge.edit_change(ids[1], opts).await.unwrap();

    let info = forge.find_change_by_id(ids[1]).await.unwrap();
    assert_eq!(info.base, "main");
}

#[tokio::test]
async fn edit_absent_fields_unchanged() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;

    forge
        .edit_change(
            ids[0],
            EditChangeOptions {
                subject: Some("new subject".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let info = forge.find_change_by_id(ids[0]).await.unwrap();
    assert_eq!(info.subject, "new subject");
    assert_eq!(info.base, "main");
    assert_eq!(info.state, ChangeState::Open);
}

// =============================================================================
// Batched states
// =============================================================================

#[tokio::test]
async fn states_preserve_input_order_and_length() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    forge.merge_change(ids[0]).await.unwrap();
    forge.close_change(ids[2]).await.unwrap();

    // Query in reverse order: results must follow the input order.
    let query = vec![ids[2], ids[1], ids[0]];
    let states = forge.changes_states(&query).await.unwrap();
    assert_eq!(
        states,
        vec![ChangeState::Closed, ChangeState::Open, ChangeState::Merged]
    );
}

#[tokio::test]
async fn states_of_unknown_change_fail() {
    let forge = ShamHub::new();
    stack_of_three(&forge).await;
    let err = forge.changes_states(&[ChangeId(99)]).await.unwrap_err();
    assert!(matches!(err, ForgeError::NotFound(_)));
}

#[tokio::test]
async fn empty_states_query_is_empty() {
    let forge = ShamHub::new();
    assert!(forge.changes_states(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn merge_latency_settles_after_polls() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    forge.set_merge_latency(2);

    forge.merge_change(ids[0]).await.unwrap();
    // First poll: still open; second: merged.
    assert_eq!(
        forge.changes_states(&[ids[0]]).await.unwrap(),
        vec![ChangeState::Open]
    );
    assert_eq!(
        forge.changes_states(&[ids[0]]).await.unwrap(),
        vec![ChangeState::Merged]
    );
}

#[tokio::test]
async fn merge_closed_change_fails() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    forge.close_change(ids[0]).await.unwrap();
    assert!(matches!(
        forge.merge_change(ids[0]).await,
        Err(ForgeError::Api { .. })
    ));
}

// =============================================================================
// Comments
// =============================================================================

#[tokio::test]
async fn comment_crud_roundtrip() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;

    let comment_id = forge
        .post_change_comment(ids[0], "first body")
        .await
        .unwrap();
    forge
        .update_change_comment(ids[0], comment_id, "second body")
        .await
        .unwrap();

    let all = forge
        .list_change_comments(ids[0], &ListChangeCommentsOptions::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].body, "second body");

    forge
        .delete_change_comment(ids[0], comment_id)
        .await
        .unwrap();
    let all = forge
        .list_change_comments(ids[0], &ListChangeCommentsOptions::default())
        .await
        .unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn comment_filters_are_conjunctive() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    forge
        .post_change_comment(ids[0], "alpha beta")
        .await
        .unwrap();
    forge.post_change_comment(ids[0], "alpha only").await.unwrap();

    let opts = ListChangeCommentsOptions {
        body_matches_all: vec![Regex::new("alpha").unwrap(), Regex::new("beta").unwrap()],
    };
    let matched = forge.list_change_comments(ids[0], &opts).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].body, "alpha beta");
}

#[tokio::test]
async fn update_unknown_comment_fails() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    assert!(matches!(
        forge.update_change_comment(ids[0], 404, "body").await,
        Err(ForgeError::NotFound(_))
    ));
}

// =============================================================================
// Scripted failures and operation recording
// =============================================================================

#[tokio::test]
async fn scripted_failure_fires_once() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    forge.fail_on(FailOn::Merge(ForgeError::RateLimited));

    assert!(matches!(
        forge.merge_change(ids[0]).await,
        Err(ForgeError::RateLimited)
    ));
    // The failure is consumed; the retry succeeds.
    forge.merge_change(ids[0]).await.unwrap();
}

#[tokio::test]
async fn operations_record_call_order() {
    let forge = ShamHub::new();
    let ids = stack_of_three(&forge).await;
    forge.merge_change(ids[0]).await.unwrap();
    forge.changes_states(&[ids[1]]).await.unwrap();

    let ops = forge.operations();
    assert_eq!(
        ops[ops.len() - 2..],
        [
            Operation::Merge { id: 1 },
            Operation::States { ids: vec![2] }
        ]
    );
}

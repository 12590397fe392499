//! merge
//!
//! Bottom-up merge orchestration.
//!
//! # Algorithm
//!
//! Plan: walk the downstack of the requested branch, reverse to bottom-up,
//! require a published change per branch, drop already-merged changes and
//! fail fast on closed ones. Confirm with the user. Execute: merge each
//! change; between a merge and the next, poll the forge until the merge
//! settles, then retarget the next change to trunk. `no_wait` skips the
//! settle-and-retarget step.
//!
//! Only the forge merges; nothing here touches local history.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::BranchName;
use crate::forge::{ChangeId, ChangeState, EditChangeOptions, ForgeError, Repository};
use crate::graph::{BranchGraph, GraphError};
use crate::state::{Store, StoreError};
use crate::ui::output::{self, Verbosity};
use crate::ui::prompts::{self, PromptError};

/// A branch whose base was merged on the forge but not yet rebased onto
/// trunk. The user runs `repo sync` (or passes the bypass flag).
#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{branch}' has stale base '{base}' (already merged); run `strata repo sync` first")]
pub struct StaleBaseError {
    /// The branch with the stale base.
    pub branch: BranchName,
    /// The merged base branch.
    pub base: BranchName,
}

/// Errors from merge orchestration.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    StaleBase(#[from] StaleBaseError),

    /// A downstack branch has no published change request.
    #[error("branch '{0}' has no published change request")]
    Unsubmitted(BranchName),

    /// A downstack change was closed without merging; the stack cannot
    /// merge past it.
    #[error("branch '{branch}' ({id}) is closed, cannot merge")]
    Closed { branch: BranchName, id: String },

    /// Waiting for a merge to settle exceeded the polling budget.
    #[error("timed out waiting for '{0}' to merge")]
    Timeout(BranchName),

    /// The user declined the confirmation prompt.
    #[error("merge aborted")]
    Aborted,

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// A request to merge a branch and its downstack.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// The topmost branch to merge.
    pub branch: BranchName,
    /// Skip waiting for each merge to settle before retargeting the next
    /// change.
    pub no_wait: bool,
}

/// A single branch+change in the merge plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeItem {
    /// The branch being merged.
    pub branch: BranchName,
    /// Its change on the forge.
    pub id: ChangeId,
}

/// Polling schedule for [`await_merged`].
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the second poll.
    pub initial: Duration,
    /// Ceiling on the delay.
    pub max: Duration,
    /// Total budget before giving up.
    pub timeout: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(8),
            timeout: Duration::from_secs(120),
        }
    }
}

impl Backoff {
    /// The delay after `attempt` sleeps: `initial * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max);
        doubled.min(self.max)
    }
}

/// Merge the given branch and all its downstack ancestors, bottom-up.
pub async fn merge_downstack(
    store: &mut Store<'_>,
    repo: &dyn Repository,
    req: &MergeRequest,
    interactive: bool,
    verbosity: Verbosity,
) -> Result<Vec<MergeItem>, MergeError> {
    merge_downstack_with(store, repo, req, interactive, verbosity, Backoff::default()).await
}

/// [`merge_downstack`] with an explicit polling schedule.
pub async fn merge_downstack_with(
    store: &mut Store<'_>,
    repo: &dyn Repository,
    req: &MergeRequest,
    interactive: bool,
    verbosity: Verbosity,
    backoff: Backoff,
) -> Result<Vec<MergeItem>, MergeError> {
    let graph = BranchGraph::load(&*store)?;
    let plan = build_plan(&graph, repo, &req.branch, verbosity).await?;
    if plan.is_empty() {
        output::print("No open changes to merge.", verbosity);
        return Ok(plan);
    }

    confirm(&plan, repo, interactive)?;
    execute_plan(store, repo, &plan, req.no_wait, verbosity, backoff).await?;
    Ok(plan)
}

/// Build the bottom-up merge plan for a branch's downstack.
async fn build_plan(
    graph: &BranchGraph,
    repo: &dyn Repository,
    branch: &BranchName,
    verbosity: Verbosity,
) -> Result<Vec<MergeItem>, MergeError> {
    // Downstack is nearest-first; reverse for bottom-up execution.
    let mut downstack = graph.downstack(branch)?;
    downstack.reverse();

    let mut items = Vec::with_capacity(downstack.len());
    for name in downstack {
        let node = graph.lookup(&name)?;
        let change = node
            .change
            .as_ref()
            .ok_or_else(|| MergeError::Unsubmitted(name.clone()))?;
        items.push(MergeItem {
            branch: name,
            id: ChangeId(change.number),
        });
    }

    filter_merged(repo, items, verbosity).await
}

/// Drop already-merged items, fail fast on closed ones.
async fn filter_merged(
    repo: &dyn Repository,
    items: Vec<MergeItem>,
    verbosity: Verbosity,
) -> Result<Vec<MergeItem>, MergeError> {
    let ids: Vec<ChangeId> = items.iter().map(|item| item.id).collect();
    let states = repo.changes_states(&ids).await?;

    let mut plan = Vec::with_capacity(items.len());
    for (item, state) in items.into_iter().zip(states) {
        match state {
            ChangeState::Merged => {
                output::print(
                    format!(
                        "{} ({}): already merged, skipping",
                        item.branch,
                        repo.forge().display_change_id(item.id)
                    ),
                    verbosity,
                );
            }
            ChangeState::Closed => {
                return Err(MergeError::Closed {
                    branch: item.branch,
                    id: repo.forge().display_change_id(item.id),
                });
            }
            ChangeState::Open => plan.push(item),
        }
    }
    Ok(plan)
}

fn confirm(plan: &[MergeItem], repo: &dyn Repository, interactive: bool) -> Result<(), MergeError> {
    let mut description = String::new();
    for item in plan {
        description.push_str(&format!(
            "  {} ({})\n",
            item.branch,
            repo.forge().display_change_id(item.id)
        ));
    }
    let proceed = prompts::confirm(
        &format!(
            "Merge {} change(s) bottom-up?\n{}",
            plan.len(),
            description
        ),
        true,
        interactive,
    )?;
    if !proceed {
        return Err(MergeError::Aborted);
    }
    Ok(())
}

async fn execute_plan(
    store: &mut Store<'_>,
    repo: &dyn Repository,
    plan: &[MergeItem],
    no_wait: bool,
    verbosity: Verbosity,
    backoff: Backoff,
) -> Result<(), MergeError> {
    let trunk = store.trunk().clone();

    for (i, item) in plan.iter().enumerate() {
        output::print(
            format!(
                "Merging {} ({})...",
                item.branch,
                repo.forge().display_change_id(item.id)
            ),
            verbosity,
        );
        repo.merge_change(item.id).await?;

        let last = i == plan.len() - 1;
        if !no_wait && !last {
            await_merged(repo, item, backoff, verbosity).await?;
            retarget(repo, &plan[i + 1], &trunk, verbosity).await?;
        }
    }

    output::print(format!("All {} change(s) merged.", plan.len()), verbosity);
    Ok(())
}

/// Poll until a change shows as merged.
///
/// Exponential backoff from `backoff.initial`, doubling up to
/// `backoff.max`, within a total budget of `backoff.timeout`. Dropping the
/// future cancels cleanly.
pub async fn await_merged(
    repo: &dyn Repository,
    item: &MergeItem,
    backoff: Backoff,
    verbosity: Verbosity,
) -> Result<(), MergeError> {
    let poll = async {
        let mut attempt = 0u32;
        loop {
            let states = repo.changes_states(&[item.id]).await?;
            if states[0] == ChangeState::Merged {
                return Ok(());
            }
            output::debug(format!("waiting for {} to settle...", item.branch), verbosity);
            tokio::time::sleep(backoff.delay(attempt)).await;
            attempt += 1;
        }
    };

    match tokio::time::timeout(backoff.timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(MergeError::Timeout(item.branch.clone())),
    }
}

/// Retarget a change's base to trunk.
async fn retarget(
    repo: &dyn Repository,
    item: &MergeItem,
    trunk: &BranchName,
    verbosity: Verbosity,
) -> Result<(), MergeError> {
    output::print(
        format!("Retargeting {} to {}...", item.branch, trunk),
        verbosity,
    );
    repo.edit_change(
        item.id,
        EditChangeOptions {
            base: Some(trunk.to_string()),
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

/// Drop the records of merged branches and reparent their surviving
/// children onto trunk, appending the merged change ids to the children's
/// history.
pub fn reconcile_merged(
    store: &mut Store<'_>,
    repo: &dyn Repository,
    merged: &[MergeItem],
) -> Result<(), MergeError> {
    if merged.is_empty() {
        return Ok(());
    }
    let trunk = store.trunk().clone();
    let merged_names: std::collections::HashSet<_> =
        merged.iter().map(|item| item.branch.clone()).collect();
    let merged_ids: Vec<String> = merged
        .iter()
        .map(|item| repo.forge().display_change_id(item.id))
        .collect();

    let survivors: Vec<_> = store
        .list_branches()
        .filter(|(name, record)| {
            !merged_names.contains(*name) && merged_names.contains(&record.base)
        })
        .map(|(name, record)| (name.clone(), record.clone()))
        .collect();

    let mut tx = store.begin_update();
    for item in merged {
        tx.delete_branch(item.branch.clone());
    }
    for (name, mut record) in survivors {
        record.base = trunk.clone();
        record.merged_downstack.extend(merged_ids.iter().cloned());
        record.touch();
        tx.upsert_branch(name, record);
    }
    tx.commit("reconcile merged downstack")?;
    Ok(())
}

/// Pre-merge validation: fail when any downstack branch sits on a base
/// whose change was already merged on the forge.
///
/// Walks the downstack of `branch`; for every member whose base is not
/// trunk and whose base has a published change, the base's state is
/// queried in one batch. The first merged base wins.
pub async fn validate_downstack(
    graph: &BranchGraph,
    repo: &dyn Repository,
    branch: &BranchName,
) -> Result<(), MergeError> {
    let trunk = graph.trunk().clone();

    struct Candidate {
        branch: BranchName,
        base: BranchName,
        id: ChangeId,
    }

    let mut candidates = Vec::new();
    for name in graph.downstack(branch)? {
        let node = graph.lookup(&name)?;
        if node.base == trunk {
            continue;
        }
        let base_node = graph.lookup(&node.base)?;
        let Some(change) = &base_node.change else {
            continue;
        };
        candidates.push(Candidate {
            branch: name,
            base: node.base.clone(),
            id: ChangeId(change.number),
        });
    }

    if candidates.is_empty() {
        return Ok(());
    }

    let ids: Vec<ChangeId> = candidates.iter().map(|c| c.id).collect();
    let states = repo.changes_states(&ids).await?;
    for (candidate, state) in candidates.into_iter().zip(states) {
        if state == ChangeState::Merged {
            return Err(MergeError::StaleBase(StaleBaseError {
                branch: candidate.branch,
                base: candidate.base,
            }));
        }
    }
    Ok(())
}

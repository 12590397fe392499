//! service
//!
//! Branch operations that mutate the store and the repository together.
//!
//! Each operation validates against the current graph, performs its VCS
//! side effects, and publishes all record changes in one transaction so a
//! failure partway never leaves dangling references behind.

use thiserror::Error;

use crate::core::types::BranchName;
use crate::forge::{ChangeId, ChangeState, ForgeError, Repository};
use crate::git::{Git, GitError};
use crate::graph::GraphError;
use crate::merge::{self, MergeItem};
use crate::restack;
use crate::state::{BranchState, Store, StoreError};
use crate::ui::output::{self, Verbosity};
use crate::ui::prompts::{self, PromptError};

/// Errors from service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The branch is already tracked.
    #[error("branch '{0}' is already tracked")]
    AlreadyTracked(BranchName),

    /// The branch does not exist in the repository.
    #[error("branch '{0}' does not exist")]
    NoSuchBranch(BranchName),

    /// Trunk cannot be tracked.
    #[error("'{0}' is the trunk; it cannot be tracked")]
    TrunkNotTrackable(BranchName),

    /// No suitable base could be inferred; pass one explicitly.
    #[error("cannot infer a base for '{0}'; use --base")]
    NoCandidateBase(BranchName),

    /// The requested base is neither trunk nor a tracked branch.
    #[error("base '{0}' is neither trunk nor a tracked branch")]
    UntrackedBase(BranchName),

    /// The working tree is on the branch being removed.
    #[error("'{0}' is checked out; switch branches before untracking it")]
    CheckedOut(BranchName),

    /// The rename target already exists.
    #[error("branch '{0}' already exists")]
    TargetExists(BranchName),

    /// The user declined a confirmation prompt.
    #[error("aborted")]
    Aborted,

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Restack(#[from] restack::RestackError),

    #[error(transparent)]
    Merge(#[from] merge::MergeError),
}

/// Start tracking a branch.
///
/// With no explicit base, the base is inferred: among trunk and the other
/// tracked branches, the candidate the branch most recently forked from
/// wins (smallest count of commits unique to the branch). Returns the
/// chosen base.
pub fn track(
    git: &Git,
    store: &mut Store,
    branch: &BranchName,
    base: Option<BranchName>,
) -> Result<BranchName, ServiceError> {
    if !git.branch_exists(branch) {
        return Err(ServiceError::NoSuchBranch(branch.clone()));
    }
    if branch == store.trunk() {
        return Err(ServiceError::TrunkNotTrackable(branch.clone()));
    }
    if store.is_tracked(branch) {
        return Err(ServiceError::AlreadyTracked(branch.clone()));
    }

    let base = match base {
        Some(base) => {
            if base != *store.trunk() && !store.is_tracked(&base) {
                return Err(ServiceError::UntrackedBase(base));
            }
            base
        }
        None => infer_base(git, store, branch)?,
    };

    // Record the fork point, not the base tip: commits the branch has not
    // been rebased over yet must still count as needs-restack.
    let branch_tip = git.head_hash(branch)?;
    let base_tip = git.head_hash(&base)?;
    let base_hash = git
        .merge_base(&branch_tip, &base_tip)?
        .unwrap_or(base_tip);

    let mut tx = store.begin_update();
    tx.upsert_branch(branch.clone(), BranchState::new(base.clone(), base_hash));
    tx.commit(&format!("track {branch}"))?;
    Ok(base)
}

/// Choose a base for a branch among trunk and the other tracked branches.
fn infer_base(
    git: &Git,
    store: &Store,
    branch: &BranchName,
) -> Result<BranchName, ServiceError> {
    let branch_tip = git.head_hash(branch)?;
    let trunk = store.trunk().clone();

    let mut candidates: Vec<BranchName> = vec![trunk.clone()];
    candidates.extend(
        store
            .list_branches()
            .map(|(name, _)| name.clone())
            .filter(|name| name != branch),
    );

    // Score: commits unique to the branch relative to the candidate.
    // Candidates that are descendants of the branch are excluded.
    let mut best: Option<(usize, bool, BranchName)> = None;
    for candidate in candidates {
        if !git.branch_exists(&candidate) {
            continue;
        }
        let candidate_tip = git.head_hash(&candidate)?;
        let Some(merge_base) = git.merge_base(&branch_tip, &candidate_tip)? else {
            continue;
        };
        if merge_base == branch_tip && candidate_tip != branch_tip {
            continue;
        }
        let (ahead, _) = git.ahead_behind(&branch_tip, &candidate_tip)?;
        let key = (ahead, candidate == trunk, candidate.clone());
        if best
            .as_ref()
            .map(|b| key < (b.0, b.1, b.2.clone()))
            .unwrap_or(true)
        {
            best = Some(key);
        }
    }

    best.map(|(_, _, name)| name)
        .ok_or_else(|| ServiceError::NoCandidateBase(branch.clone()))
}

/// Stop tracking a branch, reparenting its children onto its former base.
///
/// Refuses when the working tree is on the branch.
pub fn untrack(git: &Git, store: &mut Store, branch: &BranchName) -> Result<(), ServiceError> {
    let record = store.lookup_branch(branch)?.clone();
    if git.current_branch()?.as_ref() == Some(branch) {
        return Err(ServiceError::CheckedOut(branch.clone()));
    }

    let children: Vec<_> = store
        .list_branches()
        .filter(|(_, r)| r.base == *branch)
        .map(|(name, r)| (name.clone(), r.clone()))
        .collect();

    let mut tx = store.begin_update();
    tx.delete_branch(branch.clone());
    for (name, mut child) in children {
        child.base = record.base.clone();
        child.touch();
        tx.upsert_branch(name, child);
    }
    tx.commit(&format!("untrack {branch}"))?;
    Ok(())
}

/// Rename a tracked branch, updating the VCS ref, the record key, and all
/// children's bases in one step. The change binding survives.
pub fn rename(
    git: &Git,
    store: &mut Store,
    old: &BranchName,
    new: &BranchName,
) -> Result<(), ServiceError> {
    let record = store.lookup_branch(old)?.clone();
    if store.is_tracked(new) || git.branch_exists(new) {
        return Err(ServiceError::TargetExists(new.clone()));
    }

    git.rename_branch(old, new)?;

    let children: Vec<_> = store
        .list_branches()
        .filter(|(_, r)| r.base == *old)
        .map(|(name, r)| (name.clone(), r.clone()))
        .collect();

    let mut tx = store.begin_update();
    tx.delete_branch(old.clone());
    tx.upsert_branch(new.clone(), record);
    for (name, mut child) in children {
        child.base = new.clone();
        child.touch();
        tx.upsert_branch(name, child);
    }
    tx.commit(&format!("rename {old} to {new}"))?;
    Ok(())
}

/// Create a branch at its base's tip, check it out, and track it.
///
/// The base defaults to the current branch when tracked, trunk otherwise.
pub fn create(
    git: &Git,
    store: &mut Store,
    name: &BranchName,
    base: Option<BranchName>,
) -> Result<BranchName, ServiceError> {
    if git.branch_exists(name) {
        return Err(ServiceError::TargetExists(name.clone()));
    }

    let base = match base {
        Some(base) => base,
        None => match git.current_branch()? {
            Some(current) if store.is_tracked(&current) => current,
            _ => store.trunk().clone(),
        },
    };
    if base != *store.trunk() && !store.is_tracked(&base) {
        return Err(ServiceError::UntrackedBase(base));
    }

    let base_tip = git.head_hash(&base)?;
    git.create_branch(name, &base_tip)?;
    git.checkout_branch(name)?;

    let mut tx = store.begin_update();
    tx.upsert_branch(name.clone(), BranchState::new(base.clone(), base_tip));
    tx.commit(&format!("create {name}"))?;
    Ok(base)
}

/// Synchronize with the forge: fetch, delete local branches whose changes
/// merged, reparent survivors onto trunk, then restack everything.
///
/// Returns the branches that were cleaned up.
pub async fn sync(
    git: &Git,
    store: &mut Store<'_>,
    repo: &dyn Repository,
    interactive: bool,
    verbosity: Verbosity,
) -> Result<Vec<BranchName>, ServiceError> {
    git.fetch(store.remote())?;

    let bound: Vec<(BranchName, ChangeId)> = store
        .list_branches()
        .filter_map(|(name, record)| {
            record
                .change
                .as_ref()
                .map(|change| (name.clone(), ChangeId(change.number)))
        })
        .collect();
    if bound.is_empty() {
        output::print("No submitted branches to sync.", verbosity);
        return Ok(Vec::new());
    }

    let ids: Vec<ChangeId> = bound.iter().map(|(_, id)| *id).collect();
    let states = repo.changes_states(&ids).await?;

    let merged: Vec<MergeItem> = bound
        .into_iter()
        .zip(states)
        .filter(|(_, state)| *state == ChangeState::Merged)
        .map(|((branch, id), _)| MergeItem { branch, id })
        .collect();

    if merged.is_empty() {
        output::print("All submitted branches are still open.", verbosity);
        return Ok(Vec::new());
    }

    let mut description = String::new();
    for item in &merged {
        description.push_str(&format!(
            "  {} ({})\n",
            item.branch,
            repo.forge().display_change_id(item.id)
        ));
    }
    let proceed = prompts::confirm(
        &format!(
            "Delete {} merged branch(es)?\n{}",
            merged.len(),
            description
        ),
        true,
        interactive,
    )?;
    if !proceed {
        return Err(ServiceError::Aborted);
    }

    // Move off any branch that is about to be deleted.
    if let Some(current) = git.current_branch()? {
        if merged.iter().any(|item| item.branch == current) {
            git.checkout_branch(store.trunk())?;
        }
    }

    merge::reconcile_merged(store, repo, &merged)?;
    for item in &merged {
        if git.branch_exists(&item.branch) {
            git.delete_branch(&item.branch, true)?;
            output::print(format!("Deleted {}", item.branch), verbosity);
        }
    }

    restack::restack_repo(git, store, "strata repo restack --continue", verbosity)?;
    Ok(merged.into_iter().map(|item| item.branch).collect())
}

// Invariants for track/untrack/rename round-trips are pinned by
// tests/service_integration.rs.

//! restack
//!
//! Dependency-ordered rebase of tracked branches.
//!
//! # Algorithm
//!
//! Given a scope, compute the branch list in dependency order (parents
//! before children), drop branches that are already aligned, then for each
//! branch rebase it onto the current tip of its recorded base and commit
//! the new base hash in its own store transaction. A conflict pauses the
//! run: the remaining list is persisted as a continuation and the caller
//! surfaces the continue command verbatim.
//!
//! The whole operation is wrapped in an autostash; when any step aborts,
//! uncommitted working-tree state stays in the stash.
//!
//! Restack never pushes.

use thiserror::Error;

use crate::core::types::BranchName;
use crate::git::{Git, GitError};
use crate::graph::{BranchGraph, GraphError};
use crate::state::{Continuation, Store, StoreError};
use crate::ui::output::{self, Verbosity};

/// Which branches a restack request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the named branch.
    Branch,
    /// The branch and everything stacked on it.
    Upstack,
    /// Everything stacked on the branch, excluding the branch itself.
    UpstackExclusive,
    /// The branch's whole stack, bottom to leaves.
    Stack,
}

/// A restack request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The branch the scope is anchored at.
    pub branch: BranchName,
    /// Which branches to restack.
    pub scope: Scope,
    /// The command that resumes this operation after a conflict, verbatim.
    pub continue_command: String,
}

/// Errors from restack operations.
#[derive(Debug, Error)]
pub enum RestackError {
    /// A rebase stopped on conflicts; a continuation was persisted. The
    /// user resolves, then runs the continue command.
    #[error(
        "rebase of '{branch}' stopped on conflicts; resolve them, run \
         `git rebase --continue`, then run `{continue_command}`"
    )]
    Conflict {
        branch: BranchName,
        continue_command: String,
    },

    /// Continue was requested but no restack is paused.
    #[error("no restack in progress")]
    NothingInProgress,

    /// Continue was requested while the rebase is still unresolved.
    #[error(
        "a rebase is still in progress; resolve conflicts and run \
         `git rebase --continue` first"
    )]
    RebaseStillInProgress,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Restack the branches selected by `req`.
///
/// Returns the number of branches actually rebased; an up-to-date scope is
/// a no-op returning zero.
pub fn restack(
    git: &Git,
    store: &mut Store,
    req: &Request,
    verbosity: Verbosity,
) -> Result<usize, RestackError> {
    reparent_orphans(git, store, verbosity)?;

    let graph = BranchGraph::load(store)?;
    let list = match req.scope {
        Scope::Branch => vec![req.branch.clone()],
        Scope::Upstack => graph.upstack(&req.branch)?,
        Scope::UpstackExclusive => graph.upstack_exclusive(&req.branch)?,
        Scope::Stack => graph.stack(&req.branch)?,
    };

    run_with_autostash(git, store, &list, &req.continue_command, 0, verbosity)
}

/// Restack every tracked branch, parents before children.
pub fn restack_repo(
    git: &Git,
    store: &mut Store,
    continue_command: &str,
    verbosity: Verbosity,
) -> Result<usize, RestackError> {
    reparent_orphans(git, store, verbosity)?;

    let graph = BranchGraph::load(store)?;
    let trunk = graph.trunk().clone();
    let mut list = Vec::new();
    for root in graph.children(&trunk) {
        list.extend(graph.upstack(root)?);
    }

    run_with_autostash(git, store, &list, continue_command, 0, verbosity)
}

/// Resume a restack paused on conflicts.
///
/// The first remaining branch's rebase was finished by the user
/// (`git rebase --continue`); its record is completed here, then the loop
/// picks up the rest. The continuation is cleared once the list drains.
pub fn continue_restack(
    git: &Git,
    store: &mut Store,
    verbosity: Verbosity,
) -> Result<usize, RestackError> {
    if git.rebase_in_progress() {
        return Err(RestackError::RebaseStillInProgress);
    }
    let continuation = store
        .continuation()
        .cloned()
        .ok_or(RestackError::NothingInProgress)?;

    let (paused, rest) = match continuation.remaining.split_first() {
        Some((first, rest)) => (first.clone(), rest.to_vec()),
        None => {
            // Nothing left; just clear the stale record.
            let mut tx = store.begin_update();
            tx.clear_continuation();
            tx.commit("clear stale continuation")?;
            return Ok(0);
        }
    };

    // Complete the record of the branch whose rebase the user finished.
    let record = store.lookup_branch(&paused)?.clone();
    let new_base_hash = git.head_hash(&record.base)?;
    let mut updated = record;
    updated.base_hash = new_base_hash;
    updated.touch();
    let mut tx = store.begin_update();
    tx.upsert_branch(paused.clone(), updated);
    tx.clear_continuation();
    tx.commit(&format!("restack {paused} (continued)"))?;

    run_with_autostash(git, store, &rest, &continuation.command, 1, verbosity)
}

/// Reparent branches whose base branch was deleted from the VCS, and warn
/// about branches that themselves no longer exist.
fn reparent_orphans(
    git: &Git,
    store: &mut Store,
    verbosity: Verbosity,
) -> Result<(), RestackError> {
    let trunk = store.trunk().clone();
    let mut reparent = Vec::new();
    let mut missing = Vec::new();

    for (name, record) in store.list_branches() {
        if !git.branch_exists(name) {
            missing.push(name.clone());
            continue;
        }
        if record.base != trunk && !git.branch_exists(&record.base) {
            reparent.push((name.clone(), record.clone()));
        }
    }

    for name in missing {
        output::warn(
            format!("branch '{name}' no longer exists; run `strata branch untrack {name}`"),
            verbosity,
        );
    }

    if reparent.is_empty() {
        return Ok(());
    }

    let mut tx = store.begin_update();
    for (name, mut record) in reparent {
        output::warn(
            format!(
                "base '{}' of '{}' no longer exists; reparenting onto '{}'",
                record.base, name, trunk
            ),
            verbosity,
        );
        record.base = trunk.clone();
        record.touch();
        tx.upsert_branch(name, record);
    }
    tx.commit("reparent orphaned branches onto trunk")?;
    Ok(())
}

fn run_with_autostash(
    git: &Git,
    store: &mut Store,
    list: &[BranchName],
    continue_command: &str,
    completed: usize,
    verbosity: Verbosity,
) -> Result<usize, RestackError> {
    let stash = git.autostash("strata restack")?;
    match run_list(git, store, list, continue_command, completed, verbosity) {
        Ok(count) => {
            if let Some(stash) = stash {
                git.unstash(stash)?;
            }
            Ok(count)
        }
        Err(err) => {
            if let Some(stash) = stash {
                output::warn(
                    format!(
                        "your uncommitted changes are stashed as '{}'; \
                         `git stash pop` restores them",
                        stash.message
                    ),
                    verbosity,
                );
            }
            Err(err)
        }
    }
}

fn run_list(
    git: &Git,
    store: &mut Store,
    list: &[BranchName],
    continue_command: &str,
    completed: usize,
    verbosity: Verbosity,
) -> Result<usize, RestackError> {
    let original_branch = git.current_branch()?;
    let mut count = completed;

    for (i, branch) in list.iter().enumerate() {
        if !git.branch_exists(branch) {
            // Already warned during the orphan pass.
            continue;
        }
        let record = store.lookup_branch(branch)?.clone();
        let base_tip = git.head_hash(&record.base)?;
        if base_tip == record.base_hash {
            continue;
        }

        output::print(
            format!("Restacking {branch} onto {}", base_tip.short(7)),
            verbosity,
        );
        git.checkout_branch(branch)?;
        match git.rebase(&base_tip, &record.base_hash, branch) {
            Ok(()) => {
                let mut updated = record;
                updated.base_hash = base_tip;
                updated.touch();
                let mut tx = store.begin_update();
                tx.upsert_branch(branch.clone(), updated);
                tx.commit(&format!("restack {branch}"))?;
                count += 1;
            }
            Err(GitError::RebaseConflict { .. }) => {
                let mut tx = store.begin_update();
                tx.set_continuation(Continuation {
                    command: continue_command.to_string(),
                    remaining: list[i..].to_vec(),
                });
                tx.commit(&format!("pause restack at {branch}"))?;
                return Err(RestackError::Conflict {
                    branch: branch.clone(),
                    continue_command: continue_command.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    // Drained the list; drop any continuation from an earlier pause.
    if store.continuation().is_some() {
        let mut tx = store.begin_update();
        tx.clear_continuation();
        tx.commit("restack complete")?;
    }

    if let Some(original) = original_branch {
        if git.branch_exists(&original) {
            git.checkout_branch(&original)?;
        }
    }

    Ok(count)
}

// End-to-end behavior, including conflict pause and resume, is covered by
// tests/restack_integration.rs.

//! submit
//!
//! Change-request create-or-update pipeline.
//!
//! # Algorithm
//!
//! The caller hands the pipeline a batch of branches in bottom-up order
//! (parents first), so the forge sees creations bottom-up and a branch's
//! base always has its change before the branch itself is submitted. Per
//! branch: force-push (with lease), then create the change or reconcile
//! the existing one. Afterwards the navigation comment is rebuilt for
//! every change in the affected stacks.
//!
//! # Idempotence
//!
//! Re-running submit on an up-to-date stack performs no forge writes: the
//! existing change is read back and edited only when a field differs, and
//! comments are updated only when the rendered body changed.

pub mod nav_comment;

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::types::BranchName;
use crate::forge::{
    EditChangeOptions, ForgeError, ListChangeCommentsOptions, Repository, SubmitChangeRequest,
};
use crate::git::{ForceMode, Git, GitError};
use crate::graph::{BranchGraph, GraphError};
use crate::state::{ChangeBinding, Store, StoreError};
use crate::ui::output::{self, Verbosity};

use nav_comment::{nav_comment_patterns, render_nav_comment, NavEntry};

/// Options for a submit batch.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Print what would happen without touching the remote.
    pub dry_run: bool,
    /// Create new changes as drafts.
    pub draft: bool,
    /// Mark existing draft changes ready for review.
    pub publish: bool,
    /// Only update existing changes; skip branches without one.
    pub update_only: bool,
    /// Push with plain `--force` instead of `--force-with-lease`.
    pub force: bool,
    /// Reviewers to request on newly created changes.
    pub reviewers: Vec<String>,
    /// Labels to apply.
    pub labels: Vec<String>,
}

impl SubmitOptions {
    fn force_mode(&self) -> ForceMode {
        if self.force {
            ForceMode::Force
        } else {
            ForceMode::WithLease
        }
    }
}

/// What a submit batch did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Changes created.
    pub created: usize,
    /// Changes edited.
    pub updated: usize,
    /// Navigation comments posted or rewritten.
    pub comments: usize,
}

/// Errors from the submit pipeline.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Submission of one branch failed. Earlier branches in the batch
    /// keep their bindings.
    #[error("branch '{0}' failed to submit")]
    Branch(BranchName, #[source] ForgeError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Submit a batch of branches, bottom-up.
///
/// `branches` must be ordered parents-first; [`crate::graph::BranchGraph`]
/// traversals produce exactly that. An error on branch N aborts the batch;
/// branches submitted before N keep their bindings.
pub async fn submit_branches(
    git: &Git,
    store: &mut Store<'_>,
    repo: &dyn Repository,
    branches: &[BranchName],
    opts: &SubmitOptions,
    verbosity: Verbosity,
) -> Result<SubmitOutcome, SubmitError> {
    let mut outcome = SubmitOutcome::default();
    let remote = store.remote().to_string();
    let trunk = store.trunk().clone();

    for branch in branches {
        let record = store.lookup_branch(branch)?.clone();
        let upstream = record.upstream_or(branch).clone();

        // The change's destination: trunk, or the base's upstream name.
        let base_branch = if record.base == trunk {
            trunk.clone()
        } else {
            store.lookup_branch(&record.base)?.upstream_or(&record.base).clone()
        };

        if opts.dry_run {
            let action = if record.change.is_some() {
                "update"
            } else {
                "create"
            };
            output::print(
                format!("Would push {branch} and {action} its change (base {base_branch})"),
                verbosity,
            );
            continue;
        }

        git.push(&remote, branch, &upstream, opts.force_mode())?;

        match record.change.clone() {
            None => {
                if opts.update_only {
                    output::print(
                        format!("Skipping {branch}: no change submitted yet (--update-only)"),
                        verbosity,
                    );
                    continue;
                }
                let (subject, body) = git.commit_message(branch)?;
                let submitted = repo
                    .submit_change(SubmitChangeRequest {
                        subject,
                        body,
                        base: base_branch.to_string(),
                        head: upstream.to_string(),
                        draft: opts.draft,
                        reviewers: opts.reviewers.clone(),
                        labels: opts.labels.clone(),
                    })
                    .await
                    .map_err(|e| SubmitError::Branch(branch.clone(), e))?;

                let mut updated = record;
                updated.touch();
                updated.upstream_branch = Some(upstream.clone());
                updated.change = Some(ChangeBinding {
                    forge: repo.forge().name().to_string(),
                    number: submitted.id.0,
                    url: submitted.url.clone(),
                    nav_comment_id: None,
                });
                let mut tx = store.begin_update();
                tx.upsert_branch(branch.clone(), updated);
                tx.commit(&format!("submit {branch}"))?;

                output::print(
                    format!(
                        "Created {} for {branch}: {}",
                        repo.forge().display_change_id(submitted.id),
                        submitted.url
                    ),
                    verbosity,
                );
                outcome.created += 1;
            }
            Some(binding) => {
                let id = crate::forge::ChangeId(binding.number);
                // Read the change back and edit only what differs, so an
                // up-to-date stack needs no forge writes.
                let info = repo.find_change_by_id(id).await?;
                let mut edit = EditChangeOptions::default();
                if info.base != base_branch.as_str() {
                    edit.base = Some(base_branch.to_string());
                }
                if opts.publish && info.draft {
                    edit.draft = Some(false);
                }
                if !opts.labels.is_empty() {
                    edit.labels = Some(opts.labels.clone());
                }
                if !edit.is_empty() {
                    match repo.edit_change(id, edit).await {
                        Ok(()) => outcome.updated += 1,
                        Err(ForgeError::Unsupported(what)) => {
                            output::warn(format!("forge does not support {what}"), verbosity);
                        }
                        Err(e) => return Err(SubmitError::Branch(branch.clone(), e)),
                    }
                }
            }
        }
    }

    if !opts.dry_run {
        outcome.comments = sync_nav_comments(store, repo, branches, verbosity).await?;
    }
    Ok(outcome)
}

/// Rebuild the navigation comment on every change in the stacks touched by
/// a batch. Posts when missing, rewrites when stale, and leaves identical
/// comments alone.
async fn sync_nav_comments(
    store: &mut Store<'_>,
    repo: &dyn Repository,
    batch: &[BranchName],
    verbosity: Verbosity,
) -> Result<usize, SubmitError> {
    let graph = BranchGraph::load(&*store)?;
    let trunk = graph.trunk().clone();

    // Union of the stacks through each submitted branch, in order.
    let mut affected: Vec<BranchName> = Vec::new();
    let mut seen = BTreeSet::new();
    for branch in batch {
        for member in graph.stack(branch)? {
            if seen.insert(member.clone()) {
                affected.push(member);
            }
        }
    }

    let mut comments = 0;
    for branch in &affected {
        let record = store.lookup_branch(branch)?.clone();
        let Some(binding) = record.change.clone() else {
            continue;
        };
        let id = crate::forge::ChangeId(binding.number);

        let entries: Vec<NavEntry> = graph
            .stack(branch)?
            .iter()
            .enumerate()
            .map(|(depth, member)| {
                let node = graph.lookup(member).expect("stack members are tracked");
                match &node.change {
                    Some(change) => NavEntry {
                        label: repo
                            .forge()
                            .display_change_id(crate::forge::ChangeId(change.number)),
                        url: Some(change.url.clone()),
                        depth,
                        current: member == branch,
                    },
                    None => NavEntry {
                        label: format!("`{member}`"),
                        url: None,
                        depth,
                        current: member == branch,
                    },
                }
            })
            .collect();
        let body = render_nav_comment(&entries, trunk.as_str());

        let comment_id = match binding.nav_comment_id {
            Some(comment_id) => Some(comment_id),
            None => {
                // An earlier run may have posted without recording the id.
                let opts = ListChangeCommentsOptions {
                    body_matches_all: nav_comment_patterns(),
                };
                repo.list_change_comments(id, &opts)
                    .await?
                    .first()
                    .map(|c| c.id)
            }
        };

        let posted_id = match comment_id {
            Some(comment_id) => {
                let opts = ListChangeCommentsOptions {
                    body_matches_all: nav_comment_patterns(),
                };
                let existing = repo
                    .list_change_comments(id, &opts)
                    .await?
                    .into_iter()
                    .find(|c| c.id == comment_id);
                match existing {
                    Some(existing) if existing.body == body => comment_id,
                    _ => {
                        repo.update_change_comment(id, comment_id, &body).await?;
                        comments += 1;
                        comment_id
                    }
                }
            }
            None => {
                let comment_id = repo.post_change_comment(id, &body).await?;
                comments += 1;
                output::debug(format!("posted navigation comment on {branch}"), verbosity);
                comment_id
            }
        };

        if binding.nav_comment_id != Some(posted_id) {
            let mut updated = record;
            updated.touch();
            if let Some(change) = &mut updated.change {
                change.nav_comment_id = Some(posted_id);
            }
            let mut tx = store.begin_update();
            tx.upsert_branch(branch.clone(), updated);
            tx.commit(&format!("record navigation comment for {branch}"))?;
        }
    }

    Ok(comments)
}

// The pipeline is exercised end-to-end against ShamHub in
// tests/submit_pipeline.rs.

//! cli::commands::branch
//!
//! Single-branch operations: create, track, untrack, rename, restack,
//! submit, merge.

use anyhow::{bail, Result};

use super::{connect, resolve_branch, Context};
use crate::cli::args::{BranchCommand, SubmitArgs};
use crate::core::types::BranchName;
use crate::graph::BranchGraph;
use crate::merge::{self, MergeRequest};
use crate::restack::{self, Request, RestackError, Scope};
use crate::service;
use crate::state::Store;
use crate::submit::{self, SubmitOptions};
use crate::ui::output;

pub fn dispatch(cmd: BranchCommand, ctx: &Context) -> Result<()> {
    match cmd {
        BranchCommand::Create { name, base } => create(ctx, &name, base),
        BranchCommand::Track { branch, base } => track(ctx, branch, base),
        BranchCommand::Untrack { branch } => untrack(ctx, branch),
        BranchCommand::Rename { old, new } => rename(ctx, &old, &new),
        BranchCommand::Restack { branch, continue_ } => restack_branch(ctx, branch, continue_),
        BranchCommand::Submit { branch, opts } => submit_branch(ctx, branch, &opts),
        BranchCommand::Merge {
            branch,
            no_wait,
            no_branch_check,
        } => merge_branch(ctx, branch, no_wait, no_branch_check),
    }
}

fn create(ctx: &Context, name: &str, base: Option<String>) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let name = BranchName::new(name)?;
    let base = base.map(BranchName::new).transpose()?;

    let chosen = service::create(&git, &mut store, &name, base)?;
    output::print(format!("Created {name} on top of {chosen}"), ctx.verbosity);
    Ok(())
}

fn track(ctx: &Context, branch: Option<String>, base: Option<String>) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let branch = resolve_branch(&git, branch)?;
    let base = base.map(BranchName::new).transpose()?;

    let chosen = service::track(&git, &mut store, &branch, base)?;
    output::print(format!("Tracking {branch} (base {chosen})"), ctx.verbosity);
    Ok(())
}

fn untrack(ctx: &Context, branch: Option<String>) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let branch = resolve_branch(&git, branch)?;

    service::untrack(&git, &mut store, &branch)?;
    output::print(format!("Stopped tracking {branch}"), ctx.verbosity);
    Ok(())
}

fn rename(ctx: &Context, old: &str, new: &str) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let old = BranchName::new(old)?;
    let new = BranchName::new(new)?;

    service::rename(&git, &mut store, &old, &new)?;
    output::print(format!("Renamed {old} to {new}"), ctx.verbosity);
    Ok(())
}

fn restack_branch(ctx: &Context, branch: Option<String>, continue_: bool) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;

    let result = if continue_ {
        restack::continue_restack(&git, &mut store, ctx.verbosity)
    } else {
        let branch = resolve_branch(&git, branch)?;
        restack::restack(
            &git,
            &mut store,
            &Request {
                branch,
                scope: Scope::Branch,
                continue_command: "strata branch restack --continue".to_string(),
            },
            ctx.verbosity,
        )
    };
    report_restack(result, ctx)
}

/// Print the outcome of a restack, turning the conflict pause into a
/// non-zero exit with the continue command spelled out.
pub(crate) fn report_restack(result: Result<usize, RestackError>, ctx: &Context) -> Result<()> {
    match result {
        Ok(0) => {
            output::print("All branches are already aligned.", ctx.verbosity);
            Ok(())
        }
        Ok(count) => {
            output::print(format!("Restacked {count} branch(es)."), ctx.verbosity);
            Ok(())
        }
        Err(err @ RestackError::Conflict { .. }) => {
            bail!("{err}")
        }
        Err(err) => Err(err.into()),
    }
}

fn submit_branch(ctx: &Context, branch: Option<String>, args: &SubmitArgs) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let branch = resolve_branch(&git, branch)?;
    let batch = vec![branch];
    submit_batch(ctx, &git, &mut store, &batch, args)
}

/// Shared submit driver used by the branch, upstack, and downstack
/// commands. `batch` must already be bottom-up.
pub(crate) fn submit_batch(
    ctx: &Context,
    git: &crate::git::Git,
    store: &mut Store,
    batch: &[BranchName],
    args: &SubmitArgs,
) -> Result<()> {
    let repo = connect(git, store, ctx.verbosity)?;
    let opts = SubmitOptions {
        dry_run: args.dry_run,
        draft: args.draft,
        publish: args.publish,
        update_only: args.update_only,
        force: args.force,
        reviewers: args.reviewers.clone(),
        labels: args.labels.clone(),
    };

    let rt = super::runtime()?;
    let outcome = rt.block_on(submit::submit_branches(
        git,
        store,
        repo.as_ref(),
        batch,
        &opts,
        ctx.verbosity,
    ))?;

    output::print(
        format!(
            "Submitted {} branch(es): {} created, {} updated.",
            batch.len(),
            outcome.created,
            outcome.updated
        ),
        ctx.verbosity,
    );
    Ok(())
}

fn merge_branch(
    ctx: &Context,
    branch: Option<String>,
    no_wait: bool,
    no_branch_check: bool,
) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let branch = resolve_branch(&git, branch)?;
    let repo = connect(&git, &store, ctx.verbosity)?;

    let rt = super::runtime()?;
    rt.block_on(async {
        if !no_branch_check {
            let graph = BranchGraph::load(&store)?;
            merge::validate_downstack(&graph, repo.as_ref(), &branch).await?;
        }

        let merged = merge::merge_downstack(
            &mut store,
            repo.as_ref(),
            &MergeRequest {
                branch: branch.clone(),
                no_wait,
            },
            ctx.interactive,
            ctx.verbosity,
        )
        .await?;

        merge::reconcile_merged(&mut store, repo.as_ref(), &merged)?;
        Ok::<_, anyhow::Error>(())
    })?;

    output::print(
        "Merge complete. Run `strata repo sync` to clean up local branches.",
        ctx.verbosity,
    );
    Ok(())
}

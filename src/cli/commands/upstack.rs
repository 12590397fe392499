//! cli::commands::upstack
//!
//! Operations on a branch and everything stacked on it.

use anyhow::Result;

use super::branch::{report_restack, submit_batch};
use super::{resolve_branch, Context};
use crate::cli::args::{SubmitArgs, UpstackCommand};
use crate::graph::BranchGraph;
use crate::restack::{self, Request, Scope};
use crate::state::Store;

pub fn dispatch(cmd: UpstackCommand, ctx: &Context) -> Result<()> {
    match cmd {
        UpstackCommand::Restack {
            branch,
            skip_start,
            continue_,
        } => restack_upstack(ctx, branch, skip_start, continue_),
        UpstackCommand::Submit { branch, opts } => submit_upstack(ctx, branch, &opts),
    }
}

fn restack_upstack(
    ctx: &Context,
    branch: Option<String>,
    skip_start: bool,
    continue_: bool,
) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;

    let result = if continue_ {
        restack::continue_restack(&git, &mut store, ctx.verbosity)
    } else {
        let branch = resolve_branch(&git, branch)?;
        let scope = if skip_start {
            Scope::UpstackExclusive
        } else {
            Scope::Upstack
        };
        restack::restack(
            &git,
            &mut store,
            &Request {
                branch,
                scope,
                continue_command: "strata upstack restack --continue".to_string(),
            },
            ctx.verbosity,
        )
    };
    report_restack(result, ctx)
}

fn submit_upstack(ctx: &Context, branch: Option<String>, args: &SubmitArgs) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let branch = resolve_branch(&git, branch)?;

    // Upstack order is already parents-first, which submit requires.
    let batch = BranchGraph::load(&store)?.upstack(&branch)?;
    submit_batch(ctx, &git, &mut store, &batch, args)
}

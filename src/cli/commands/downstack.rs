//! cli::commands::downstack
//!
//! Operations on a branch and its ancestors.

use anyhow::Result;

use super::branch::submit_batch;
use super::{resolve_branch, Context};
use crate::cli::args::{DownstackCommand, SubmitArgs};
use crate::graph::BranchGraph;
use crate::state::Store;

pub fn dispatch(cmd: DownstackCommand, ctx: &Context) -> Result<()> {
    match cmd {
        DownstackCommand::Submit { branch, opts } => submit_downstack(ctx, branch, &opts),
    }
}

fn submit_downstack(ctx: &Context, branch: Option<String>, args: &SubmitArgs) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let branch = resolve_branch(&git, branch)?;

    // Downstack is nearest-first; reverse for the bottom-up order submit
    // requires.
    let mut batch = BranchGraph::load(&store)?.downstack(&branch)?;
    batch.reverse();
    submit_batch(ctx, &git, &mut store, &batch, args)
}

//! cli::commands::repo
//!
//! Repository-wide operations: init, sync, restack.

use anyhow::{Context as _, Result};

use super::branch::report_restack;
use super::{connect, Context};
use crate::cli::args::RepoCommand;
use crate::core::types::BranchName;
use crate::forge::detect_provider;
use crate::restack;
use crate::service;
use crate::state::{RepoConfig, Store};
use crate::ui::output;

pub fn dispatch(cmd: RepoCommand, ctx: &Context) -> Result<()> {
    match cmd {
        RepoCommand::Init { trunk, remote } => init(ctx, trunk, &remote),
        RepoCommand::Sync => sync(ctx),
        RepoCommand::Restack { continue_ } => restack_repo(ctx, continue_),
    }
}

fn init(ctx: &Context, trunk: Option<String>, remote: &str) -> Result<()> {
    let git = ctx.open_git()?;

    let trunk = match trunk {
        Some(name) => BranchName::new(name)?,
        None => git
            .current_branch()?
            .context("not on a branch; pass --trunk")?,
    };

    let remote_url = git
        .remote_url(remote)?
        .with_context(|| format!("remote '{remote}' is not configured"))?;
    let forge = detect_provider(&remote_url)
        .with_context(|| format!("could not detect a forge from '{remote_url}'"))?;

    Store::init(
        &git,
        RepoConfig {
            trunk: trunk.clone(),
            remote: remote.to_string(),
            forge: forge.name().to_string(),
        },
    )?;
    output::print(
        format!("Initialized: trunk {trunk}, remote {remote}, forge {forge}"),
        ctx.verbosity,
    );
    Ok(())
}

fn sync(ctx: &Context) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;
    let repo = connect(&git, &store, ctx.verbosity)?;

    let rt = super::runtime()?;
    let cleaned = rt.block_on(service::sync(
        &git,
        &mut store,
        repo.as_ref(),
        ctx.interactive,
        ctx.verbosity,
    ))?;

    if !cleaned.is_empty() {
        output::print(
            format!("Synced: {} merged branch(es) cleaned up.", cleaned.len()),
            ctx.verbosity,
        );
    }
    Ok(())
}

fn restack_repo(ctx: &Context, continue_: bool) -> Result<()> {
    let git = ctx.open_git()?;
    let mut store = Store::open(&git)?;

    let result = if continue_ {
        restack::continue_restack(&git, &mut store, ctx.verbosity)
    } else {
        restack::restack_repo(
            &git,
            &mut store,
            "strata repo restack --continue",
            ctx.verbosity,
        )
    };
    report_restack(result, ctx)
}

//! cli::commands::ci
//!
//! Merge guard for forge CI pipelines.
//!
//! Checks that a change request's base branch is trunk before allowing a
//! merge, preventing out-of-order merges in a stacked workflow. By
//! default only strata-managed changes (those carrying a navigation
//! comment) are checked; unmanaged ones pass. `--all` blocks any change
//! whose base is not trunk. Trunk is read from `--trunk` or extracted
//! from the navigation comment.
//!
//! Exit codes: 0 safe to merge, non-zero otherwise.

use anyhow::{bail, Result};

use super::{connect, Context};
use crate::cli::args::CiCommand;
use crate::forge::{ChangeId, ListChangeCommentsOptions, Repository};
use crate::state::Store;
use crate::submit::nav_comment::{extract_trunk, nav_comment_patterns};
use crate::ui::output;

pub fn dispatch(cmd: CiCommand, ctx: &Context) -> Result<()> {
    match cmd {
        CiCommand::MergeGuard { number, trunk, all } => merge_guard(ctx, number, trunk, all),
    }
}

fn merge_guard(ctx: &Context, number: u64, trunk: Option<String>, all: bool) -> Result<()> {
    let git = ctx.open_git()?;
    let store = Store::open(&git)?;
    let repo = connect(&git, &store, ctx.verbosity)?;

    let rt = super::runtime()?;
    rt.block_on(evaluate(ctx, repo.as_ref(), number, trunk, all))
}

async fn evaluate(
    ctx: &Context,
    repo: &dyn Repository,
    number: u64,
    trunk_override: Option<String>,
    all: bool,
) -> Result<()> {
    let id = ChangeId(number);
    let display = repo.forge().display_change_id(id);
    let change = repo.find_change_by_id(id).await?;

    let (trunk, managed) = match trunk_override {
        Some(trunk) => (Some(trunk), true),
        None => detect_trunk(repo, id).await?,
    };

    if !managed {
        if all {
            bail!(
                "{display}: base '{}' is not trunk (unmanaged change blocked by --all)",
                change.base
            );
        }
        output::print(
            format!("{display}: not managed by strata, allowing"),
            ctx.verbosity,
        );
        return Ok(());
    }

    let trunk = trunk.ok_or_else(|| {
        anyhow::anyhow!("could not determine trunk for {display}: use --trunk to specify it")
    })?;

    if change.base == trunk {
        output::print(
            format!("{display}: base is '{trunk}' (trunk), safe to merge"),
            ctx.verbosity,
        );
        return Ok(());
    }

    bail!(
        "{display}: base is '{}', expected trunk '{trunk}'. \
         Merge the downstack change first or retarget to trunk",
        change.base
    )
}

/// Find the navigation comment on a change and read the trunk name from
/// it. Returns `(None, false)` for unmanaged changes.
async fn detect_trunk(
    repo: &dyn Repository,
    id: ChangeId,
) -> Result<(Option<String>, bool)> {
    let opts = ListChangeCommentsOptions {
        body_matches_all: nav_comment_patterns(),
    };
    let comments = repo.list_change_comments(id, &opts).await?;
    match comments.first() {
        Some(comment) => Ok((extract_trunk(&comment.body), true)),
        None => Ok((None, false)),
    }
}

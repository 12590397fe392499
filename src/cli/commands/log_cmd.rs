//! cli::commands::log_cmd
//!
//! Tree rendering of the tracked branch graph.

use anyhow::Result;

use super::Context;
use crate::cli::args::LogCommand;
use crate::core::types::BranchName;
use crate::git::Git;
use crate::graph::BranchGraph;
use crate::state::Store;
use crate::ui::output;

pub fn dispatch(cmd: LogCommand, ctx: &Context) -> Result<()> {
    match cmd {
        LogCommand::Short => log(ctx, false),
        LogCommand::Long => log(ctx, true),
    }
}

fn log(ctx: &Context, long: bool) -> Result<()> {
    let git = ctx.open_git()?;
    let store = Store::open(&git)?;
    let graph = BranchGraph::load(&store)?;
    let current = git.current_branch()?;

    let trunk = graph.trunk().clone();
    let mut lines = vec![format_line(&git, &graph, &trunk, current.as_ref(), 0, long)?];
    render_children(&git, &graph, &trunk, current.as_ref(), 1, long, &mut lines)?;

    for line in lines {
        output::print(line, ctx.verbosity);
    }
    Ok(())
}

fn render_children(
    git: &Git,
    graph: &BranchGraph,
    branch: &BranchName,
    current: Option<&BranchName>,
    depth: usize,
    long: bool,
    lines: &mut Vec<String>,
) -> Result<()> {
    for child in graph.children(branch) {
        lines.push(format_line(git, graph, child, current, depth, long)?);
        render_children(git, graph, child, current, depth + 1, long, lines)?;
    }
    Ok(())
}

fn format_line(
    git: &Git,
    graph: &BranchGraph,
    branch: &BranchName,
    current: Option<&BranchName>,
    depth: usize,
    long: bool,
) -> Result<String> {
    let indent = "  ".repeat(depth);
    let marker = if current == Some(branch) { "*" } else { " " };
    let mut line = format!("{indent}{marker} {branch}");

    if long {
        if let Ok(node) = graph.lookup(branch) {
            if let Some(change) = &node.change {
                line.push_str(&format!(" (#{} {})", change.number, change.url));
            }
            // Needs-restack marker: the base moved since the last rebase.
            if git.branch_exists(&node.base) {
                let base_tip = git.head_hash(&node.base)?;
                if base_tip != node.base_hash {
                    line.push_str(" (needs restack)");
                }
            }
        }
    }
    Ok(line)
}

//! cli::commands
//!
//! Command handlers: argument resolution, wiring, and dispatch.

pub mod auth_cmd;
pub mod branch;
pub mod ci;
pub mod completion;
pub mod downstack;
pub mod log_cmd;
pub mod repo;
pub mod upstack;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::auth;
use crate::cli::args::Command;
use crate::core::types::BranchName;
use crate::forge::{connect_repository, detect_provider, forge_identity, ForgeProvider, Repository};
use crate::git::Git;
use crate::state::Store;
use crate::ui::Verbosity;

/// Execution context shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Directory to run in (defaults to the process working directory).
    pub cwd: Option<PathBuf>,
    /// Output verbosity.
    pub verbosity: Verbosity,
    /// Whether prompts may be shown.
    pub interactive: bool,
}

impl Context {
    /// Open the repository this invocation operates on.
    pub fn open_git(&self) -> Result<Git> {
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().context("cannot determine working directory")?,
        };
        Git::open(&cwd).context("failed to open repository")
    }
}

/// Dispatch a parsed command.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Branch(cmd) => branch::dispatch(cmd, ctx),
        Command::Upstack(cmd) => upstack::dispatch(cmd, ctx),
        Command::Downstack(cmd) => downstack::dispatch(cmd, ctx),
        Command::Repo(cmd) => repo::dispatch(cmd, ctx),
        Command::Auth(cmd) => auth_cmd::dispatch(cmd, ctx),
        Command::Log(cmd) => log_cmd::dispatch(cmd, ctx),
        Command::Ci(cmd) => ci::dispatch(cmd, ctx),
        Command::Completion { shell } => completion::run(shell),
    }
}

/// Resolve a branch argument, falling back to the current branch.
pub(crate) fn resolve_branch(git: &Git, arg: Option<String>) -> Result<BranchName> {
    match arg {
        Some(name) => Ok(BranchName::new(name)?),
        None => git
            .current_branch()?
            .context("not on a branch; name one explicitly"),
    }
}

/// The forge provider configured for the repository.
pub(crate) fn provider_for(git: &Git, store: &Store) -> Result<(ForgeProvider, String)> {
    let remote_url = git
        .remote_url(store.remote())?
        .with_context(|| format!("remote '{}' is not configured", store.remote()))?;
    let provider = ForgeProvider::parse(store.forge())
        .or_else(|| detect_provider(&remote_url))
        .with_context(|| format!("forge '{}' is not available in this build", store.forge()))?;
    Ok((provider, remote_url))
}

/// Connect to the forge repository behind the configured remote.
pub(crate) fn connect(git: &Git, store: &Store, verbosity: Verbosity) -> Result<Box<dyn Repository>> {
    let (provider, remote_url) = provider_for(git, store)?;
    let (token, source) = auth::resolve_token(forge_identity(provider))?;
    crate::ui::output::debug(format!("using {provider} token from {source}"), verbosity);
    Ok(connect_repository(&remote_url, &token, Some(provider.name()))?)
}

/// A current-thread tokio runtime for forge I/O.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

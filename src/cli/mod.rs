//! cli
//!
//! Command-line interface layer.
//!
//! The CLI is thin: it parses arguments via clap and dispatches to the
//! service, restack, submit, and merge layers. Repository state changes
//! never happen here directly.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use anyhow::Result;

use crate::ui::Verbosity;

/// Run the CLI application. This is the entry point called from main.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let ctx = commands::Context {
        cwd: cli.cwd.clone(),
        verbosity: Verbosity::from_flags(cli.quiet, cli.debug),
        interactive: cli.is_interactive(),
    };

    commands::dispatch(cli.command, &ctx)
}

//! cli::commands::completion
//!
//! Shell completion script generation.

use anyhow::Result;
use clap::CommandFactory;

use crate::cli::args::{Cli, Shell};

pub fn run(shell: Shell) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(
        clap_complete::Shell::from(shell),
        &mut command,
        name,
        &mut std::io::stdout(),
    );
    Ok(())
}

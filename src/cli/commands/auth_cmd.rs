//! cli::commands::auth_cmd
//!
//! Credential management: login, logout, status.
//!
//! These commands never print token values.

use anyhow::{bail, Context as _, Result};

use super::{provider_for, Context};
use crate::auth;
use crate::cli::args::AuthCommand;
use crate::forge::forge_identity;
use crate::state::Store;
use crate::ui::output;

pub fn dispatch(cmd: AuthCommand, ctx: &Context) -> Result<()> {
    match cmd {
        AuthCommand::Login { token } => login(ctx, token),
        AuthCommand::Logout => logout(ctx),
        AuthCommand::Status => status(ctx),
    }
}

fn login(ctx: &Context, token: Option<String>) -> Result<()> {
    let git = ctx.open_git()?;
    let store = Store::open(&git)?;
    let (provider, _) = provider_for(&git, &store)?;
    let forge = forge_identity(provider);

    let token = match token {
        Some(token) => token,
        None => {
            if !ctx.interactive {
                bail!("pass --token when running non-interactively");
            }
            rpassword_read(&format!("{provider} token: "))?
        }
    };
    if token.trim().is_empty() {
        bail!("empty token");
    }

    let destination = auth::login(forge, token.trim())?;
    output::print(
        format!("Stored {provider} token in the {destination}."),
        ctx.verbosity,
    );
    Ok(())
}

/// Read a line from stdin without persisting it anywhere else.
fn rpassword_read(prompt: &str) -> Result<String> {
    use std::io::{BufRead, Write};
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read token")?;
    Ok(line.trim().to_string())
}

fn logout(ctx: &Context) -> Result<()> {
    let git = ctx.open_git()?;
    let store = Store::open(&git)?;
    let (provider, _) = provider_for(&git, &store)?;

    auth::logout(forge_identity(provider))?;
    output::print(format!("Removed stored {provider} tokens."), ctx.verbosity);
    Ok(())
}

fn status(ctx: &Context) -> Result<()> {
    let git = ctx.open_git()?;
    let store = Store::open(&git)?;
    let (provider, _) = provider_for(&git, &store)?;

    match auth::status(forge_identity(provider))? {
        Some(source) => {
            output::print(
                format!("{provider}: token available from the {source}."),
                ctx.verbosity,
            );
            Ok(())
        }
        None => bail!("{provider}: no token found; run `strata auth login`"),
    }
}

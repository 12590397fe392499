//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! Available on every command:
//! - `--cwd <path>`: Run as if started in that directory
//! - `--debug`: Enable debug output
//! - `--quiet` / `-q`: Minimal output; implies --no-interactive
//! - `--interactive` / `--no-interactive`: Control prompts

use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Strata - stacked branches and change requests on plain Git
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if strata was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output; implies --no-interactive
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable interactive prompts
    #[arg(long, global = true, conflicts_with = "no_interactive")]
    pub interactive: bool,

    /// Disable interactive prompts
    #[arg(long, global = true)]
    pub no_interactive: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// Whether prompts may be shown.
    pub fn is_interactive(&self) -> bool {
        if self.interactive {
            true
        } else if self.no_interactive || self.quiet {
            false
        } else {
            std::io::stdin().is_terminal()
        }
    }
}

/// Top-level command groups.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Operate on a single branch
    #[command(subcommand)]
    Branch(BranchCommand),

    /// Operate on a branch and everything stacked on it
    #[command(subcommand)]
    Upstack(UpstackCommand),

    /// Operate on a branch and everything below it
    #[command(subcommand)]
    Downstack(DownstackCommand),

    /// Repository-wide operations
    #[command(subcommand)]
    Repo(RepoCommand),

    /// Manage forge credentials
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Display the tracked branch graph
    #[command(subcommand)]
    Log(LogCommand),

    /// Commands intended for CI pipelines
    #[command(subcommand)]
    Ci(CiCommand),

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// `strata branch ...`
#[derive(Subcommand, Debug)]
pub enum BranchCommand {
    /// Create a branch on top of the current one and track it
    Create {
        /// Name of the new branch
        name: String,

        /// Base branch (defaults to the current branch, or trunk)
        #[arg(short, long)]
        base: Option<String>,
    },

    /// Start tracking a branch
    Track {
        /// Branch to track (defaults to the current branch)
        branch: Option<String>,

        /// Base branch this merges into (guessed when omitted)
        #[arg(short, long)]
        base: Option<String>,
    },

    /// Stop tracking a branch
    Untrack {
        /// Branch to untrack (defaults to the current branch)
        branch: Option<String>,
    },

    /// Rename a tracked branch
    Rename {
        /// Current name
        old: String,

        /// New name
        new: String,
    },

    /// Rebase a branch onto its recorded base
    Restack {
        /// Branch to restack (defaults to the current branch)
        branch: Option<String>,

        /// Resume after resolving conflicts
        #[arg(long = "continue")]
        continue_: bool,
    },

    /// Push a branch and create or update its change request
    Submit {
        /// Branch to submit (defaults to the current branch)
        branch: Option<String>,

        #[command(flatten)]
        opts: SubmitArgs,
    },

    /// Merge a branch and its downstack, bottom-up
    Merge {
        /// Branch to merge (defaults to the current branch)
        branch: Option<String>,

        /// Do not wait for merges to settle before retargeting
        #[arg(long)]
        no_wait: bool,

        /// Skip the stale-base validation
        #[arg(long)]
        no_branch_check: bool,
    },
}

/// `strata upstack ...`
#[derive(Subcommand, Debug)]
pub enum UpstackCommand {
    /// Restack a branch and everything stacked on it
    Restack {
        /// Starting branch (defaults to the current branch)
        branch: Option<String>,

        /// Skip the starting branch, restack only what is above it
        #[arg(long)]
        skip_start: bool,

        /// Resume after resolving conflicts
        #[arg(long = "continue")]
        continue_: bool,
    },

    /// Submit a branch and everything stacked on it
    Submit {
        /// Starting branch (defaults to the current branch)
        branch: Option<String>,

        #[command(flatten)]
        opts: SubmitArgs,
    },
}

/// `strata downstack ...`
#[derive(Subcommand, Debug)]
pub enum DownstackCommand {
    /// Submit a branch and its ancestors, bottom-up
    Submit {
        /// Starting branch (defaults to the current branch)
        branch: Option<String>,

        #[command(flatten)]
        opts: SubmitArgs,
    },
}

/// `strata repo ...`
#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Initialize strata in this repository
    Init {
        /// Trunk branch (defaults to the current branch)
        #[arg(long)]
        trunk: Option<String>,

        /// Remote to push to
        #[arg(long, default_value = "origin")]
        remote: String,
    },

    /// Fetch, clean up merged branches, and restack
    Sync,

    /// Restack every tracked branch
    Restack {
        /// Resume after resolving conflicts
        #[arg(long = "continue")]
        continue_: bool,
    },
}

/// `strata auth ...`
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Store a forge token
    Login {
        /// Token value; prompted for when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Remove stored forge tokens
    Logout,

    /// Show where credentials come from
    Status,
}

/// `strata log ...`
#[derive(Subcommand, Debug)]
pub enum LogCommand {
    /// Branch names only
    Short,

    /// Branches with change requests and restack status
    Long,
}

/// `strata ci ...`
#[derive(Subcommand, Debug)]
pub enum CiCommand {
    /// Verify a change request is safe to merge (base is trunk)
    ///
    /// Exit codes: 0 when the change's base is trunk or the change is not
    /// managed by strata (without --all); non-zero otherwise.
    MergeGuard {
        /// Change request number to check
        number: u64,

        /// Override trunk detection
        #[arg(long)]
        trunk: Option<String>,

        /// Block every non-trunk-based change, managed or not
        #[arg(long)]
        all: bool,
    },
}

/// Shared submit flags.
#[derive(clap::Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Show what would happen without pushing or calling the forge
    #[arg(long)]
    pub dry_run: bool,

    /// Create new changes as drafts
    #[arg(long)]
    pub draft: bool,

    /// Mark existing draft changes ready for review
    #[arg(long, conflicts_with = "draft")]
    pub publish: bool,

    /// Only update existing changes; never create
    #[arg(long)]
    pub update_only: bool,

    /// Push with --force instead of --force-with-lease
    #[arg(long)]
    pub force: bool,

    /// Reviewers to request (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub reviewers: Vec<String>,

    /// Labels to apply (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,
}

/// Shells supported by the completion command.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Elvish,
    Powershell,
}

impl From<Shell> for clap_complete::Shell {
    fn from(shell: Shell) -> Self {
        match shell {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::Elvish => clap_complete::Shell::Elvish,
            Shell::Powershell => clap_complete::Shell::PowerShell,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_branch_track() {
        let cli = Cli::try_parse_from(["strata", "branch", "track", "feat", "--base", "main"])
            .unwrap();
        match cli.command {
            Command::Branch(BranchCommand::Track { branch, base }) => {
                assert_eq!(branch.as_deref(), Some("feat"));
                assert_eq!(base.as_deref(), Some("main"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_merge_guard() {
        let cli =
            Cli::try_parse_from(["strata", "ci", "merge-guard", "42", "--all"]).unwrap();
        match cli.command {
            Command::Ci(CiCommand::MergeGuard { number, all, trunk }) => {
                assert_eq!(number, 42);
                assert!(all);
                assert!(trunk.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn restack_continue_flag() {
        let cli = Cli::try_parse_from(["strata", "upstack", "restack", "--continue"]).unwrap();
        match cli.command {
            Command::Upstack(UpstackCommand::Restack { continue_, .. }) => assert!(continue_),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn draft_conflicts_with_publish() {
        assert!(Cli::try_parse_from([
            "strata", "branch", "submit", "--draft", "--publish"
        ])
        .is_err());
    }

    #[test]
    fn quiet_disables_interactive() {
        let cli = Cli::try_parse_from(["strata", "-q", "repo", "sync"]).unwrap();
        assert!(!cli.is_interactive());
    }
}

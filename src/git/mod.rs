//! git
//!
//! Single doorway for all Git operations. No other module imports `git2`
//! or spawns `git` directly.

pub mod facade;

pub use facade::{Autostash, ForceMode, Git, GitCommandResult, GitError, GitState};

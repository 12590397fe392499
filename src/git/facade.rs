//! git::facade
//!
//! Git interface implementation.
//!
//! # Architecture
//!
//! The [`Git`] struct is the only way to interact with a Git repository.
//! Queries and ref/blob plumbing go through `git2`; history-rewriting
//! operations (rebase, cherry-pick), transport (push, fetch) and worktree
//! operations (checkout, stash) shell out to the `git` binary, whose
//! behavior for those is the contract users already rely on.
//!
//! # Error Handling
//!
//! Failures are categorized into typed variants. The one callers branch on
//! is [`GitError::RebaseConflict`]: the rebase stopped on conflicts and was
//! left in progress for the user to resolve.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::core::types::{BranchName, Oid, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not inside a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was searched.
        path: PathBuf,
    },

    /// Repository has no working directory.
    #[error("bare repository not supported")]
    BareRepo,

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound { refname: String },

    /// Requested branch does not exist.
    #[error("branch not found: {name}")]
    BranchNotFound { name: String },

    /// Compare-and-swap precondition failed: the ref moved since it was
    /// read. Callers may re-read and retry.
    #[error("concurrent update of {refname}: expected {expected}, found {actual}")]
    CasFailed {
        refname: String,
        expected: String,
        actual: String,
    },

    /// A rebase stopped on conflicts and is waiting in the working tree.
    #[error("rebase of '{branch}' stopped on conflicts")]
    RebaseConflict {
        /// The branch whose rebase is in progress.
        branch: BranchName,
    },

    /// Another operation (merge, cherry-pick, ...) is already in progress.
    #[error("{operation} in progress")]
    OperationInProgress { operation: GitState },

    /// Object not found in the repository.
    #[error("object not found: {oid}")]
    ObjectNotFound { oid: String },

    /// Blob content is not valid UTF-8.
    #[error("blob is not valid UTF-8: {oid}")]
    InvalidUtf8 { oid: String },

    /// A git subprocess exited non-zero for a reason other than conflict.
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal { message: String },
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => GitError::RefNotFound {
                refname: err.message().to_string(),
            },
            _ => GitError::Internal {
                message: err.message().to_string(),
            },
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        GitError::Internal {
            message: err.to_string(),
        }
    }
}

/// State of in-progress Git operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitState {
    /// No operation in progress.
    Clean,
    /// Rebase in progress.
    Rebase,
    /// Merge in progress.
    Merge,
    /// Cherry-pick in progress.
    CherryPick,
    /// Revert in progress.
    Revert,
}

impl GitState {
    /// Check if any operation is in progress.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, GitState::Clean)
    }

    /// Human-readable description of the state.
    pub fn description(&self) -> &'static str {
        match self {
            GitState::Clean => "clean",
            GitState::Rebase => "rebase",
            GitState::Merge => "merge",
            GitState::CherryPick => "cherry-pick",
            GitState::Revert => "revert",
        }
    }
}

impl std::fmt::Display for GitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// How a push may move the remote ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceMode {
    /// Fast-forward only.
    #[default]
    None,
    /// `--force-with-lease`: overwrite only what we last saw.
    WithLease,
    /// Unconditional `--force`.
    Force,
}

impl ForceMode {
    fn flag(&self) -> Option<&'static str> {
        match self {
            ForceMode::None => None,
            ForceMode::WithLease => Some("--force-with-lease"),
            ForceMode::Force => Some("--force"),
        }
    }
}

/// Result of running a git subprocess via [`Git::run_command`].
#[derive(Debug, Clone)]
pub struct GitCommandResult {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Marker for a working tree stashed by [`Git::autostash`].
///
/// Pass it back to [`Git::unstash`] on the success path; on the error path,
/// drop it and tell the user their changes are in the stash. The stash entry
/// is never discarded implicitly.
#[derive(Debug)]
#[must_use = "an unrestored autostash leaves user changes in the stash"]
pub struct Autostash {
    /// The stash message, for user-facing recovery instructions.
    pub message: String,
}

/// The primary Git interface.
///
/// # CAS Semantics
///
/// Ref mutations used by the state store go through
/// [`update_ref_cas`](Git::update_ref_cas): updates succeed only if the
/// ref's current value matches the expected one, so two concurrent
/// invocations cannot silently overwrite each other's state.
pub struct Git {
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    // =========================================================================
    // Opening and info
    // =========================================================================

    /// Open the repository containing `path`.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if no repository is found
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::discover(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;
        Ok(Self { repo })
    }

    /// The working directory.
    ///
    /// # Errors
    ///
    /// - [`GitError::BareRepo`] when the repository has none
    pub fn workdir(&self) -> Result<&Path, GitError> {
        self.repo.workdir().ok_or(GitError::BareRepo)
    }

    /// Detect in-progress operations that need user intervention.
    pub fn state(&self) -> GitState {
        match self.repo.state() {
            git2::RepositoryState::Clean => GitState::Clean,
            git2::RepositoryState::Rebase
            | git2::RepositoryState::RebaseInteractive
            | git2::RepositoryState::RebaseMerge => GitState::Rebase,
            git2::RepositoryState::Merge => GitState::Merge,
            git2::RepositoryState::CherryPick | git2::RepositoryState::CherryPickSequence => {
                GitState::CherryPick
            }
            git2::RepositoryState::Revert | git2::RepositoryState::RevertSequence => {
                GitState::Revert
            }
            _ => GitState::Clean,
        }
    }

    /// Whether a rebase is currently in progress.
    pub fn rebase_in_progress(&self) -> bool {
        matches!(self.state(), GitState::Rebase)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The currently checked out branch, or `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<BranchName>, GitError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            // Unborn HEAD (fresh repo) still names a branch.
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                let reference = self.repo.find_reference("HEAD")?;
                let target = reference
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"));
                return match target {
                    Some(name) => Ok(Some(BranchName::new(name)?)),
                    None => Ok(None),
                };
            }
            Err(e) => return Err(e.into()),
        };
        if !head.is_branch() {
            return Ok(None);
        }
        match head.shorthand() {
            Some(name) => Ok(Some(BranchName::new(name)?)),
            None => Ok(None),
        }
    }

    /// Whether a local branch exists.
    pub fn branch_exists(&self, name: &BranchName) -> bool {
        self.repo
            .find_branch(name.as_str(), git2::BranchType::Local)
            .is_ok()
    }

    /// The commit a local branch points at.
    pub fn head_hash(&self, name: &BranchName) -> Result<Oid, GitError> {
        let branch = self
            .repo
            .find_branch(name.as_str(), git2::BranchType::Local)
            .map_err(|_| GitError::BranchNotFound {
                name: name.to_string(),
            })?;
        let oid = branch
            .get()
            .target()
            .ok_or_else(|| GitError::RefNotFound {
                refname: format!("refs/heads/{}", name),
            })?;
        Ok(Oid::new(oid.to_string())?)
    }

    /// The merge base of two commits, or `None` if the histories are
    /// unrelated.
    pub fn merge_base(&self, a: &Oid, b: &Oid) -> Result<Option<Oid>, GitError> {
        let a = parse_git2_oid(a)?;
        let b = parse_git2_oid(b)?;
        match self.repo.merge_base(a, b) {
            Ok(base) => Ok(Some(Oid::new(base.to_string())?)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count `(ahead, behind)`: commits on `local` not reachable from
    /// `upstream`, and commits on `upstream` not reachable from `local`.
    pub fn ahead_behind(&self, local: &Oid, upstream: &Oid) -> Result<(usize, usize), GitError> {
        let local = parse_git2_oid(local)?;
        let upstream = parse_git2_oid(upstream)?;
        Ok(self.repo.graph_ahead_behind(local, upstream)?)
    }

    /// Count commits on `base` that are not reachable from `branch`.
    ///
    /// Zero means the branch contains all of its base.
    pub fn commits_behind(&self, branch: &BranchName, base: &BranchName) -> Result<usize, GitError> {
        let branch_tip = self.head_hash(branch)?;
        let base_tip = self.head_hash(base)?;
        let (_, behind) = self.ahead_behind(&branch_tip, &base_tip)?;
        Ok(behind)
    }

    /// Subject and body of the commit at a branch tip.
    pub fn commit_message(&self, branch: &BranchName) -> Result<(String, String), GitError> {
        let tip = self.head_hash(branch)?;
        let commit = self.repo.find_commit(parse_git2_oid(&tip)?)?;
        let subject = commit.summary().unwrap_or_default().to_string();
        let body = commit
            .message()
            .unwrap_or_default()
            .strip_prefix(&subject)
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok((subject, body))
    }

    /// URL of a configured remote, or `None` when the remote is missing.
    pub fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => Ok(remote.url().map(|u| u.to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Branch mutations
    // =========================================================================

    /// Create a local branch at `start_point`.
    pub fn create_branch(&self, name: &BranchName, start_point: &Oid) -> Result<(), GitError> {
        let commit = self.repo.find_commit(parse_git2_oid(start_point)?)?;
        self.repo.branch(name.as_str(), &commit, false)?;
        Ok(())
    }

    /// Check out a local branch, updating the working tree.
    pub fn checkout_branch(&self, name: &BranchName) -> Result<(), GitError> {
        self.git_or_fail(&["checkout", "--quiet", name.as_str()])?;
        Ok(())
    }

    /// Delete a local branch. `force` deletes even if unmerged.
    pub fn delete_branch(&self, name: &BranchName, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.git_or_fail(&["branch", flag, name.as_str()])?;
        Ok(())
    }

    /// Rename a local branch, preserving its reflog.
    pub fn rename_branch(&self, old: &BranchName, new: &BranchName) -> Result<(), GitError> {
        let mut branch = self
            .repo
            .find_branch(old.as_str(), git2::BranchType::Local)
            .map_err(|_| GitError::BranchNotFound {
                name: old.to_string(),
            })?;
        branch.rename(new.as_str(), false)?;
        Ok(())
    }

    // =========================================================================
    // History rewriting
    // =========================================================================

    /// Rebase `branch` onto `onto`, replaying the commits after `upstream`.
    ///
    /// Equivalent to `git rebase --onto <onto> <upstream> <branch>`. The
    /// operation is restartable: on conflict it is left in progress and
    /// [`GitError::RebaseConflict`] is returned; the user resolves and runs
    /// `git rebase --continue` (or the tool's continue command).
    pub fn rebase(
        &self,
        onto: &Oid,
        upstream: &Oid,
        branch: &BranchName,
    ) -> Result<(), GitError> {
        if self.state().is_in_progress() {
            return Err(GitError::OperationInProgress {
                operation: self.state(),
            });
        }
        let result = self.run_command(&[
            "rebase",
            "--onto",
            onto.as_str(),
            upstream.as_str(),
            branch.as_str(),
        ])?;
        if result.success {
            return Ok(());
        }
        if self.rebase_in_progress() {
            return Err(GitError::RebaseConflict {
                branch: branch.clone(),
            });
        }
        Err(GitError::CommandFailed {
            command: "rebase".to_string(),
            stderr: result.stderr,
        })
    }

    /// Abort an in-progress rebase.
    pub fn rebase_abort(&self) -> Result<(), GitError> {
        self.git_or_fail(&["rebase", "--abort"])?;
        Ok(())
    }

    /// Apply commits on top of HEAD.
    pub fn cherry_pick(&self, hashes: &[Oid]) -> Result<(), GitError> {
        let mut args = vec!["cherry-pick"];
        args.extend(hashes.iter().map(|h| h.as_str()));
        self.git_or_fail(&args)?;
        Ok(())
    }

    /// Hard-reset the current branch and working tree to `target`.
    pub fn reset_hard(&self, target: &Oid) -> Result<(), GitError> {
        self.git_or_fail(&["reset", "--hard", target.as_str()])?;
        Ok(())
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Push a local branch to `remote` under the given upstream name.
    pub fn push(
        &self,
        remote: &str,
        local: &BranchName,
        upstream: &BranchName,
        force: ForceMode,
    ) -> Result<(), GitError> {
        let refspec = format!("refs/heads/{}:refs/heads/{}", local, upstream);
        let mut args = vec!["push", "--quiet"];
        if let Some(flag) = force.flag() {
            args.push(flag);
        }
        args.push(remote);
        args.push(&refspec);
        self.git_or_fail(&args)?;
        Ok(())
    }

    /// Fetch from a remote.
    pub fn fetch(&self, remote: &str) -> Result<(), GitError> {
        self.git_or_fail(&["fetch", "--quiet", remote])?;
        Ok(())
    }

    // =========================================================================
    // Worktree stash
    // =========================================================================

    /// Stash uncommitted changes, if any.
    ///
    /// Returns `None` when the working tree is clean. The caller must hand
    /// the returned [`Autostash`] back to [`unstash`](Git::unstash) on
    /// success; on failure the stash entry is kept so no user work is lost.
    pub fn autostash(&self, message: &str) -> Result<Option<Autostash>, GitError> {
        let result = self.run_command(&[
            "stash",
            "push",
            "--quiet",
            "--include-untracked",
            "--message",
            message,
        ])?;
        if !result.success {
            return Err(GitError::CommandFailed {
                command: "stash push".to_string(),
                stderr: result.stderr,
            });
        }
        // `git stash push` on a clean tree exits 0 without creating a stash.
        let list = self.run_command(&["stash", "list", "--grep", message, "--max-count", "1"])?;
        if list.stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Autostash {
            message: message.to_string(),
        }))
    }

    /// Restore a stash created by [`autostash`](Git::autostash).
    pub fn unstash(&self, _stash: Autostash) -> Result<(), GitError> {
        self.git_or_fail(&["stash", "pop", "--quiet"])?;
        Ok(())
    }

    // =========================================================================
    // Ref and blob plumbing (used by the state store)
    // =========================================================================

    /// Write a blob into the object database.
    pub fn write_blob(&self, content: &[u8]) -> Result<Oid, GitError> {
        let oid = self.repo.blob(content)?;
        Ok(Oid::new(oid.to_string())?)
    }

    /// Read a blob as UTF-8 text.
    pub fn read_blob_as_string(&self, oid: &Oid) -> Result<String, GitError> {
        let blob = self
            .repo
            .find_blob(parse_git2_oid(oid)?)
            .map_err(|_| GitError::ObjectNotFound {
                oid: oid.to_string(),
            })?;
        String::from_utf8(blob.content().to_vec()).map_err(|_| GitError::InvalidUtf8 {
            oid: oid.to_string(),
        })
    }

    /// Resolve a ref directly to the object it names, or `None` if absent.
    ///
    /// Unlike branch resolution this does not peel to a commit; state refs
    /// point at blobs.
    pub fn try_resolve_ref_to_object(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.repo.find_reference(refname) {
            Ok(reference) => match reference.target() {
                Some(oid) => Ok(Some(Oid::new(oid.to_string())?)),
                None => Ok(None),
            },
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Update a ref with compare-and-swap semantics.
    ///
    /// With `expected_old = None` the ref must not exist yet; otherwise its
    /// current value must equal `expected_old`.
    ///
    /// # Errors
    ///
    /// - [`GitError::CasFailed`] when the precondition does not hold
    pub fn update_ref_cas(
        &self,
        refname: &str,
        new: &Oid,
        expected_old: Option<&Oid>,
        log_message: &str,
    ) -> Result<(), GitError> {
        let current = self.try_resolve_ref_to_object(refname)?;
        match (expected_old, &current) {
            (None, Some(actual)) => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: "<absent>".to_string(),
                    actual: actual.to_string(),
                })
            }
            (Some(expected), None) => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected.to_string(),
                    actual: "<absent>".to_string(),
                })
            }
            (Some(expected), Some(actual)) if *expected != *actual => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                })
            }
            _ => {}
        }

        let new = parse_git2_oid(new)?;
        match expected_old {
            None => {
                self.repo.reference(refname, new, false, log_message)?;
            }
            Some(old) => {
                self.repo.reference_matching(
                    refname,
                    new,
                    true,
                    parse_git2_oid(old)?,
                    log_message,
                )?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Subprocess escape hatch
    // =========================================================================

    /// Run a git subprocess in the working directory and capture its output.
    pub fn run_command(&self, args: &[&str]) -> Result<GitCommandResult, GitError> {
        let workdir = self.workdir()?;
        let output = Command::new("git")
            .current_dir(workdir)
            .args(args)
            .output()
            .map_err(|e| GitError::CommandFailed {
                command: args.join(" "),
                stderr: e.to_string(),
            })?;
        Ok(GitCommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a git subprocess, failing on non-zero exit.
    fn git_or_fail(&self, args: &[&str]) -> Result<GitCommandResult, GitError> {
        let result = self.run_command(args)?;
        if !result.success {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}

fn parse_git2_oid(oid: &Oid) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(oid.as_str()).map_err(|_| GitError::ObjectNotFound {
        oid: oid.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_state_display() {
        assert_eq!(GitState::Clean.description(), "clean");
        assert_eq!(GitState::Rebase.description(), "rebase");
        assert!(!GitState::Clean.is_in_progress());
        assert!(GitState::CherryPick.is_in_progress());
    }

    #[test]
    fn force_mode_flags() {
        assert_eq!(ForceMode::None.flag(), None);
        assert_eq!(ForceMode::WithLease.flag(), Some("--force-with-lease"));
        assert_eq!(ForceMode::Force.flag(), Some("--force"));
    }

    #[test]
    fn open_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Git::open(dir.path()).unwrap_err();
        assert!(matches!(err, GitError::NotARepo { .. }));
    }

    #[test]
    fn rebase_conflict_error_names_branch() {
        let err = GitError::RebaseConflict {
            branch: BranchName::new("feat-a").unwrap(),
        };
        assert!(err.to_string().contains("feat-a"));
    }
}

//! Shared helpers for integration tests: throwaway repositories with real
//! history, built through the git binary.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use strata::core::types::{BranchName, Oid};
use strata::git::Git;
use strata::state::{RepoConfig, Store};

/// A throwaway repository rooted in a temp directory. The working tree
/// lives under `repo/` so a bare `origin.git` can sit beside it.
pub struct TestRepo {
    dir: TempDir,
    workdir: PathBuf,
}

impl TestRepo {
    /// Create a repository with trunk `main` and one initial commit.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let workdir = dir.path().join("repo");
        std::fs::create_dir(&workdir).expect("create workdir");
        let repo = Self { dir, workdir };
        repo.git_ok(&["init", "--quiet", "--initial-branch", "main"]);
        repo.git_ok(&["config", "user.name", "Test"]);
        repo.git_ok(&["config", "user.email", "test@example.invalid"]);
        repo.commit_file("README.md", "hello\n", "initial commit");
        repo
    }

    /// Path of the working directory.
    pub fn path(&self) -> &Path {
        &self.workdir
    }

    /// Open the facade on this repository.
    pub fn git(&self) -> Git {
        Git::open(self.path()).expect("open repository")
    }

    /// Run git, asserting success.
    pub fn git_ok(&self, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(self.path())
            .args(args)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Write a file and commit it on the current branch.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write file");
        self.git_ok(&["add", "."]);
        self.git_ok(&["commit", "--quiet", "-m", message]);
    }

    /// Create a branch at `from` and check it out.
    pub fn branch_from(&self, name: &str, from: &str) {
        self.git_ok(&["checkout", "--quiet", "-b", name, from]);
    }

    /// Check out an existing branch.
    pub fn checkout(&self, name: &str) {
        self.git_ok(&["checkout", "--quiet", name]);
    }

    /// Tip of a branch.
    pub fn head(&self, name: &str) -> Oid {
        self.git().head_hash(&branch(name)).expect("head hash")
    }

    /// Add a bare repository beside the working tree as the `origin`
    /// remote, and return its path.
    pub fn add_origin(&self) -> PathBuf {
        let origin = self.dir.path().join("origin.git");
        let output = Command::new("git")
            .args(["init", "--quiet", "--bare"])
            .arg(&origin)
            .output()
            .expect("spawn git");
        assert!(output.status.success(), "bare init failed");
        self.git_ok(&["remote", "add", "origin", origin.to_str().unwrap()]);
        origin
    }
}

/// Shorthand for a validated branch name.
pub fn branch(name: &str) -> BranchName {
    BranchName::new(name).expect("valid branch name")
}

/// Initialize the store with trunk `main`, remote `origin`, and the
/// shamhub forge.
pub fn init_store(git: &Git) -> Store<'_> {
    Store::init(
        git,
        RepoConfig {
            trunk: branch("main"),
            remote: "origin".to_string(),
            forge: "shamhub".to_string(),
        },
    )
    .expect("init store")
}

/// Track a branch with an explicit base, recording the current base tip.
pub fn track_with_base(git: &Git, store: &mut Store, name: &str, base: &str) {
    strata::service::track(git, store, &branch(name), Some(branch(base))).expect("track branch");
}

//! state::store
//!
//! The keyed record store behind `refs/strata/data`.
//!
//! # Transactions
//!
//! [`Store::begin_update`] returns a [`Transaction`] that buffers writes;
//! nothing is visible until [`Transaction::commit`] publishes the whole
//! batch with one compare-and-swap ref update. A concurrent writer makes
//! the commit fail with [`StoreError::Conflict`], which callers may retry
//! after re-reading. Dropping a transaction discards it.
//!
//! # Example
//!
//! ```ignore
//! let git = Git::open(Path::new("."))?;
//! let mut store = Store::open(&git)?;
//!
//! let mut tx = store.begin_update();
//! tx.upsert_branch(name.clone(), record);
//! tx.commit("track feat-a")?;
//! ```

use thiserror::Error;

use super::schema::{
    parse_or_migrate, BranchState, Continuation, RepoConfig, SchemaError, StateDocument,
};
use crate::core::types::{BranchName, Oid};
use crate::git::{Git, GitError};

/// The ref the state document lives behind.
pub const STATE_REF: &str = "refs/strata/data";

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for the requested branch.
    #[error("branch not tracked: {0}")]
    NotExist(BranchName),

    /// The repository has no state document; run init first.
    #[error("repository is not initialized for strata")]
    Uninitialized,

    /// The repository already has a state document.
    #[error("repository is already initialized")]
    AlreadyInitialized,

    /// Another process updated the store concurrently; retry after
    /// re-reading.
    #[error("state changed concurrently: expected {expected}, found {actual}")]
    Conflict { expected: String, actual: String },

    /// Schema parse, migration, or invariant failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Underlying Git failure.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// The durable store: an in-memory copy of the state document plus the blob
/// OID it was read from, for CAS updates.
pub struct Store<'a> {
    git: &'a Git,
    doc: StateDocument,
    ref_oid: Oid,
}

impl<'a> Store<'a> {
    /// Open the store, migrating old schema versions forward.
    ///
    /// A migrated document is persisted immediately, so later readers see
    /// the current version.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Uninitialized`] when no state exists yet
    pub fn open(git: &'a Git) -> Result<Self, StoreError> {
        let ref_oid = git
            .try_resolve_ref_to_object(STATE_REF)?
            .ok_or(StoreError::Uninitialized)?;
        let json = git.read_blob_as_string(&ref_oid)?;
        let (doc, migrated) = parse_or_migrate(&json)?;

        let mut store = Self { git, doc, ref_oid };
        if migrated {
            let doc = store.doc.clone();
            let message = format!("migrate state to v{}", doc.schema_version);
            store.publish(doc, &message)?;
        }
        Ok(store)
    }

    /// Initialize the store for a repository.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyInitialized`] when state already exists
    pub fn init(git: &'a Git, repo: RepoConfig) -> Result<Self, StoreError> {
        if git.try_resolve_ref_to_object(STATE_REF)?.is_some() {
            return Err(StoreError::AlreadyInitialized);
        }
        let doc = StateDocument::new(repo);
        let blob = git.write_blob(doc.to_json()?.as_bytes())?;
        git.update_ref_cas(STATE_REF, &blob, None, "strata: initialize state")
            .map_err(cas_to_conflict)?;
        Ok(Self {
            git,
            doc,
            ref_oid: blob,
        })
    }

    /// The trunk branch. Stable for the lifetime of the process.
    pub fn trunk(&self) -> &BranchName {
        &self.doc.repo.trunk
    }

    /// The configured remote name.
    pub fn remote(&self) -> &str {
        &self.doc.repo.remote
    }

    /// The configured forge name.
    pub fn forge(&self) -> &str {
        &self.doc.repo.forge
    }

    /// Look up a tracked branch.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotExist`] when the branch is not tracked
    pub fn lookup_branch(&self, name: &BranchName) -> Result<&BranchState, StoreError> {
        self.doc
            .branches
            .get(name)
            .ok_or_else(|| StoreError::NotExist(name.clone()))
    }

    /// Whether a branch is tracked.
    pub fn is_tracked(&self, name: &BranchName) -> bool {
        self.doc.branches.contains_key(name)
    }

    /// All tracked branches with their records, in lexicographic order.
    pub fn list_branches(&self) -> impl Iterator<Item = (&BranchName, &BranchState)> + '_ {
        self.doc.branches.iter()
    }

    /// The pending continuation, if a multi-branch operation is paused.
    pub fn continuation(&self) -> Option<&Continuation> {
        self.doc.continuation.as_ref()
    }

    /// Begin a buffered update.
    pub fn begin_update(&mut self) -> Transaction<'_, 'a> {
        Transaction {
            store: self,
            ops: Vec::new(),
        }
    }

    /// Serialize, write, and CAS-publish a new document revision.
    fn publish(&mut self, doc: StateDocument, message: &str) -> Result<(), StoreError> {
        doc.validate()?;
        let blob = self.git.write_blob(doc.to_json()?.as_bytes())?;
        self.git
            .update_ref_cas(
                STATE_REF,
                &blob,
                Some(&self.ref_oid),
                &format!("strata: {message}"),
            )
            .map_err(cas_to_conflict)?;
        self.doc = doc;
        self.ref_oid = blob;
        Ok(())
    }
}

fn cas_to_conflict(err: GitError) -> StoreError {
    match err {
        GitError::CasFailed {
            expected, actual, ..
        } => StoreError::Conflict { expected, actual },
        other => StoreError::Git(other),
    }
}

enum Op {
    Upsert(BranchName, BranchState),
    Delete(BranchName),
    SetContinuation(Continuation),
    ClearContinuation,
}

/// A buffered multi-key update. Commit publishes all buffered writes
/// atomically; dropping the transaction discards them.
pub struct Transaction<'s, 'g> {
    store: &'s mut Store<'g>,
    ops: Vec<Op>,
}

impl Transaction<'_, '_> {
    /// Insert or replace a branch record.
    pub fn upsert_branch(&mut self, name: BranchName, record: BranchState) -> &mut Self {
        self.ops.push(Op::Upsert(name, record));
        self
    }

    /// Delete a branch record. Deleting an untracked branch is a no-op at
    /// commit time.
    pub fn delete_branch(&mut self, name: BranchName) -> &mut Self {
        self.ops.push(Op::Delete(name));
        self
    }

    /// Record a paused operation.
    pub fn set_continuation(&mut self, continuation: Continuation) -> &mut Self {
        self.ops.push(Op::SetContinuation(continuation));
        self
    }

    /// Clear any paused operation.
    pub fn clear_continuation(&mut self) -> &mut Self {
        self.ops.push(Op::ClearContinuation);
        self
    }

    /// Apply the buffered writes and publish them atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] when another process won the race
    /// - [`StoreError::Schema`] when the result violates an invariant
    pub fn commit(self, message: &str) -> Result<(), StoreError> {
        let mut doc = self.store.doc.clone();
        for op in self.ops {
            match op {
                Op::Upsert(name, record) => {
                    doc.branches.insert(name, record);
                }
                Op::Delete(name) => {
                    doc.branches.remove(&name);
                }
                Op::SetContinuation(continuation) => {
                    doc.continuation = Some(continuation);
                }
                Op::ClearContinuation => {
                    doc.continuation = None;
                }
            }
        }
        self.store.publish(doc, message)
    }

    /// Discard the buffered writes.
    pub fn rollback(self) {}
}

// Store behavior against real repositories is covered by
// tests/store_integration.rs; the schema-level checks live in
// state::schema's unit tests.

//! state
//!
//! Durable per-branch records and repository configuration.
//!
//! # Architecture
//!
//! All state lives in a single JSON document stored as a blob behind the
//! `refs/strata/data` ref, outside the working tree. Updating the ref with
//! compare-and-swap semantics makes every transaction an atomic multi-key
//! publish: either all buffered writes land, or none do, and a concurrent
//! writer loses the race with a retryable [`StoreError::Conflict`].

pub mod schema;
pub mod store;

pub use schema::{
    BranchState, ChangeBinding, Continuation, RepoConfig, SchemaError, StateDocument,
    SCHEMA_VERSION, STATE_KIND,
};
pub use store::{Store, StoreError, Transaction, STATE_REF};

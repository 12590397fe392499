//! state::schema
//!
//! Versioned schema for the state document.
//!
//! # Schema Design
//!
//! The document is self-describing with `kind` and `schema_version`, strictly
//! parsed (unknown fields rejected), and migrated forward-only: an old
//! document is upgraded at open time, a newer one is refused.
//!
//! # Example
//!
//! ```
//! use strata::state::schema::{parse_document, STATE_KIND};
//!
//! let json = r#"{
//!     "kind": "strata.state",
//!     "schema_version": 2,
//!     "repo": { "trunk": "main", "remote": "origin", "forge": "github" },
//!     "branches": {},
//!     "continuation": null
//! }"#;
//!
//! let doc = parse_document(json).unwrap();
//! assert_eq!(doc.kind, STATE_KIND);
//! assert_eq!(doc.repo.trunk.as_str(), "main");
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{BranchName, Oid};

/// The kind identifier for the state document.
pub const STATE_KIND: &str = "strata.state";

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Errors from schema parsing and validation.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse state document: {0}")]
    Parse(String),

    #[error("invalid kind '{found}', expected '{}'", STATE_KIND)]
    InvalidKind { found: String },

    #[error("unsupported schema version {0}, this build supports up to {SCHEMA_VERSION}")]
    UnsupportedVersion(u32),

    #[error("state invariant violated: {0}")]
    Invariant(String),
}

/// Repository-wide configuration. Trunk is immutable after init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The upstream integration branch every stack terminates at.
    pub trunk: BranchName,
    /// The remote branches are pushed to.
    pub remote: String,
    /// Name of the forge serving this repository ("github", "gitlab", ...).
    pub forge: String,
}

/// Binding between a tracked branch and its change request on the forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeBinding {
    /// Forge that owns the change; must match [`RepoConfig::forge`].
    pub forge: String,
    /// Change request number on the forge.
    pub number: u64,
    /// Web URL of the change.
    pub url: String,
    /// Identifier of the navigation comment, once posted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_comment_id: Option<u64>,
}

/// Record for a single tracked branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchState {
    /// Name of the parent branch (trunk or another tracked branch).
    pub base: BranchName,
    /// Commit the base pointed at when this branch was last rebased.
    pub base_hash: Oid,
    /// Branch name used when pushing, when it differs from the local name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_branch: Option<BranchName>,
    /// Forge change bound to this branch, if submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeBinding>,
    /// Change ids merged below this branch while it was stacked, kept for
    /// history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_downstack: Vec<String>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl BranchState {
    /// Create a record with only the structural fields set.
    pub fn new(base: BranchName, base_hash: Oid) -> Self {
        Self {
            base,
            base_hash,
            upstream_branch: None,
            change: None,
            merged_downstack: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Stamp the record as freshly written.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The branch name to push as: `upstream_branch` when set, otherwise the
    /// local name.
    pub fn upstream_or<'a>(&'a self, local: &'a BranchName) -> &'a BranchName {
        self.upstream_branch.as_ref().unwrap_or(local)
    }
}

/// A paused multi-branch operation, resumable across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Continuation {
    /// The command the user must run to resume, verbatim.
    pub command: String,
    /// Branches still to process, in dependency order. The first entry is
    /// the branch whose rebase was interrupted.
    pub remaining: Vec<BranchName>,
}

/// The complete state document (v2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDocument {
    /// Kind identifier (always "strata.state").
    pub kind: String,
    /// Schema version (always 2 for this struct).
    pub schema_version: u32,
    /// Repository configuration.
    pub repo: RepoConfig,
    /// Tracked branch records, keyed by branch name. BTreeMap keeps listing
    /// deterministic and lexicographic.
    pub branches: BTreeMap<BranchName, BranchState>,
    /// A paused operation, if any.
    pub continuation: Option<Continuation>,
}

impl StateDocument {
    /// Create an empty document for a freshly initialized repository.
    pub fn new(repo: RepoConfig) -> Self {
        Self {
            kind: STATE_KIND.to_string(),
            schema_version: SCHEMA_VERSION,
            repo,
            branches: BTreeMap::new(),
            continuation: None,
        }
    }

    /// Validate the structural invariants of the tracked graph.
    ///
    /// - trunk is never tracked
    /// - every base resolves to trunk or to another tracked branch
    /// - the base relation is acyclic
    /// - change bindings name the configured forge
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.branches.contains_key(&self.repo.trunk) {
            return Err(SchemaError::Invariant(format!(
                "trunk '{}' must not be tracked",
                self.repo.trunk
            )));
        }

        for (name, record) in &self.branches {
            if record.base != self.repo.trunk && !self.branches.contains_key(&record.base) {
                return Err(SchemaError::Invariant(format!(
                    "branch '{}' has dangling base '{}'",
                    name, record.base
                )));
            }
            if let Some(change) = &record.change {
                if change.forge != self.repo.forge {
                    return Err(SchemaError::Invariant(format!(
                        "branch '{}' is bound to forge '{}', repository uses '{}'",
                        name, change.forge, self.repo.forge
                    )));
                }
            }
        }

        // Walk every base chain; revisiting a branch within one walk is a
        // cycle.
        for start in self.branches.keys() {
            let mut seen = std::collections::HashSet::new();
            let mut current = start;
            while let Some(record) = self.branches.get(current) {
                if !seen.insert(current.clone()) {
                    return Err(SchemaError::Invariant(format!(
                        "cycle detected through branch '{}'",
                        current
                    )));
                }
                current = &record.base;
            }
        }

        Ok(())
    }

    /// Serialize to the canonical on-disk form.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        serde_json::to_string(self).map_err(|e| SchemaError::Parse(e.to_string()))
    }
}

/// Envelope for version dispatch before full parsing.
#[derive(Debug, Deserialize)]
struct Envelope {
    kind: String,
    schema_version: u32,
}

/// Version 1 lacked merge history and continuations.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BranchStateV1 {
    base: BranchName,
    base_hash: Oid,
    #[serde(default)]
    upstream_branch: Option<BranchName>,
    #[serde(default)]
    change: Option<ChangeBinding>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateDocumentV1 {
    #[allow(dead_code)]
    kind: String,
    #[allow(dead_code)]
    schema_version: u32,
    repo: RepoConfig,
    branches: BTreeMap<BranchName, BranchStateV1>,
}

/// Parse a state document, migrating older versions forward.
///
/// Returns the document and whether a migration happened (the caller should
/// persist the upgraded form).
pub fn parse_or_migrate(json: &str) -> Result<(StateDocument, bool), SchemaError> {
    let envelope: Envelope =
        serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;

    if envelope.kind != STATE_KIND {
        return Err(SchemaError::InvalidKind {
            found: envelope.kind,
        });
    }

    match envelope.schema_version {
        1 => {
            let old: StateDocumentV1 =
                serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
            let mut doc = StateDocument::new(old.repo);
            for (name, record) in old.branches {
                doc.branches.insert(
                    name,
                    BranchState {
                        base: record.base,
                        base_hash: record.base_hash,
                        upstream_branch: record.upstream_branch,
                        change: record.change,
                        merged_downstack: Vec::new(),
                        updated_at: Utc::now(),
                    },
                );
            }
            doc.validate()?;
            Ok((doc, true))
        }
        2 => {
            let doc: StateDocument =
                serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
            doc.validate()?;
            Ok((doc, false))
        }
        v => Err(SchemaError::UnsupportedVersion(v)),
    }
}

/// Parse a current-version document without migration.
pub fn parse_document(json: &str) -> Result<StateDocument, SchemaError> {
    let (doc, migrated) = parse_or_migrate(json)?;
    if migrated {
        return Err(SchemaError::Parse(
            "document requires migration; use parse_or_migrate".into(),
        ));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_oid() -> Oid {
        Oid::new("abc123def4567890abc123def4567890abc12345").unwrap()
    }

    fn sample_repo() -> RepoConfig {
        RepoConfig {
            trunk: BranchName::new("main").unwrap(),
            remote: "origin".to_string(),
            forge: "github".to_string(),
        }
    }

    #[test]
    fn empty_document_roundtrip() {
        let doc = StateDocument::new(sample_repo());
        let json = doc.to_json().unwrap();
        let parsed = parse_document(&json).unwrap();
        assert_eq!(doc, parsed);
    }

    #[test]
    fn document_with_branches_roundtrip() {
        let mut doc = StateDocument::new(sample_repo());
        let mut record = BranchState::new(BranchName::new("main").unwrap(), sample_oid());
        record.change = Some(ChangeBinding {
            forge: "github".to_string(),
            number: 42,
            url: "https://github.com/o/r/pull/42".to_string(),
            nav_comment_id: Some(7),
        });
        record.merged_downstack = vec!["#12".to_string()];
        doc.branches
            .insert(BranchName::new("feat-a").unwrap(), record);

        let json = doc.to_json().unwrap();
        let parsed = parse_document(&json).unwrap();
        assert_eq!(doc, parsed);
    }

    #[test]
    fn wrong_kind_rejected() {
        let json = r#"{"kind": "something.else", "schema_version": 2,
            "repo": {"trunk": "main", "remote": "origin", "forge": "github"},
            "branches": {}, "continuation": null}"#;
        assert!(matches!(
            parse_or_migrate(json),
            Err(SchemaError::InvalidKind { .. })
        ));
    }

    #[test]
    fn future_version_rejected() {
        let json = r#"{"kind": "strata.state", "schema_version": 99,
            "repo": {"trunk": "main", "remote": "origin", "forge": "github"},
            "branches": {}, "continuation": null}"#;
        assert!(matches!(
            parse_or_migrate(json),
            Err(SchemaError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn v1_migrates_forward() {
        let json = r#"{"kind": "strata.state", "schema_version": 1,
            "repo": {"trunk": "main", "remote": "origin", "forge": "github"},
            "branches": {
                "feat-a": {
                    "base": "main",
                    "base_hash": "abc123def4567890abc123def4567890abc12345"
                }
            }}"#;
        let (doc, migrated) = parse_or_migrate(json).unwrap();
        assert!(migrated);
        assert_eq!(doc.schema_version, SCHEMA_VERSION);
        let record = &doc.branches[&BranchName::new("feat-a").unwrap()];
        assert!(record.merged_downstack.is_empty());
        assert!(doc.continuation.is_none());
    }

    #[test]
    fn tracked_trunk_rejected() {
        let mut doc = StateDocument::new(sample_repo());
        doc.branches.insert(
            BranchName::new("main").unwrap(),
            BranchState::new(BranchName::new("main").unwrap(), sample_oid()),
        );
        assert!(matches!(doc.validate(), Err(SchemaError::Invariant(_))));
    }

    #[test]
    fn dangling_base_rejected() {
        let mut doc = StateDocument::new(sample_repo());
        doc.branches.insert(
            BranchName::new("feat-a").unwrap(),
            BranchState::new(BranchName::new("gone").unwrap(), sample_oid()),
        );
        assert!(matches!(doc.validate(), Err(SchemaError::Invariant(_))));
    }

    #[test]
    fn cycle_rejected() {
        let mut doc = StateDocument::new(sample_repo());
        doc.branches.insert(
            BranchName::new("a").unwrap(),
            BranchState::new(BranchName::new("b").unwrap(), sample_oid()),
        );
        doc.branches.insert(
            BranchName::new("b").unwrap(),
            BranchState::new(BranchName::new("a").unwrap(), sample_oid()),
        );
        assert!(matches!(doc.validate(), Err(SchemaError::Invariant(_))));
    }

    #[test]
    fn foreign_forge_binding_rejected() {
        let mut doc = StateDocument::new(sample_repo());
        let mut record = BranchState::new(BranchName::new("main").unwrap(), sample_oid());
        record.change = Some(ChangeBinding {
            forge: "gitlab".to_string(),
            number: 1,
            url: "https://gitlab.com/o/r/-/merge_requests/1".to_string(),
            nav_comment_id: None,
        });
        doc.branches
            .insert(BranchName::new("feat-a").unwrap(), record);
        assert!(matches!(doc.validate(), Err(SchemaError::Invariant(_))));
    }

    #[test]
    fn upstream_or_falls_back_to_local() {
        let local = BranchName::new("feat-a").unwrap();
        let mut record = BranchState::new(BranchName::new("main").unwrap(), sample_oid());
        assert_eq!(record.upstream_or(&local), &local);

        let upstream = BranchName::new("user/feat-a").unwrap();
        record.upstream_branch = Some(upstream.clone());
        assert_eq!(record.upstream_or(&local), &upstream);
    }
}

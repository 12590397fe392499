//! forge::traits
//!
//! Forge and Repository trait definitions.
//!
//! # Design
//!
//! [`Repository`] is async because its operations involve network I/O.
//! Implementations are invoked only after local structural invariants are
//! satisfied, may fail without compromising local correctness, and write
//! results only into cached metadata fields.
//!
//! The one behavioral contract callers lean on hardest:
//! [`Repository::changes_states`] returns exactly one state per requested
//! id, in input order, batched into a single round trip where the protocol
//! permits.

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

/// Errors from forge operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Authentication is required but not available.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication failed (invalid token, expired, insufficient scope).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The destination branch of a submission is unknown to the forge;
    /// submit the base's change first.
    #[error("base branch '{0}' has no submitted change on the forge")]
    UnsubmittedBase(String),

    /// Rate limit exceeded.
    #[error("rate limited")]
    RateLimited,

    /// The API returned an error.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Network or connection error. Transient; retried only inside bounded
    /// polling loops.
    #[error("network error: {0}")]
    Network(String),

    /// The operation is not supported by this forge. Callers report this
    /// as a warning and continue.
    #[error("not supported by this forge: {0}")]
    Unsupported(String),
}

/// Identifier of a change request on a forge.
///
/// The numeric value is common to all supported forges; how it renders
/// (`#42` vs `!42`) and parses is forge-specific via
/// [`Forge::display_change_id`] and [`Forge::change_id_from_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeId(pub u64);

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    /// Open and awaiting review or merge.
    Open,
    /// Closed without merging.
    Closed,
    /// Merged.
    Merged,
}

impl std::fmt::Display for ChangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeState::Open => write!(f, "open"),
            ChangeState::Closed => write!(f, "closed"),
            ChangeState::Merged => write!(f, "merged"),
        }
    }
}

/// Request to submit a new change.
#[derive(Debug, Clone)]
pub struct SubmitChangeRequest {
    /// Title of the change.
    pub subject: String,
    /// Body / description.
    pub body: String,
    /// Destination branch.
    pub base: String,
    /// Source branch.
    pub head: String,
    /// Submit as a draft.
    pub draft: bool,
    /// Reviewers to request.
    pub reviewers: Vec<String>,
    /// Labels to apply.
    pub labels: Vec<String>,
}

/// A successfully submitted change.
#[derive(Debug, Clone)]
pub struct SubmittedChange {
    /// The change's identifier.
    pub id: ChangeId,
    /// Web URL for viewing the change.
    pub url: String,
}

/// Fields to change on an existing change request. Absent fields are left
/// untouched; applying the same options twice is a no-op on the forge.
#[derive(Debug, Clone, Default)]
pub struct EditChangeOptions {
    /// Retarget the change to a different base branch.
    pub base: Option<String>,
    /// Replace the title.
    pub subject: Option<String>,
    /// Replace the body.
    pub body: Option<String>,
    /// Toggle draft state.
    pub draft: Option<bool>,
    /// Replace the labels.
    pub labels: Option<Vec<String>>,
}

impl EditChangeOptions {
    /// Whether the options change anything at all.
    pub fn is_empty(&self) -> bool {
        self.base.is_none()
            && self.subject.is_none()
            && self.body.is_none()
            && self.draft.is_none()
            && self.labels.is_none()
    }
}

/// A change request as found on the forge.
#[derive(Debug, Clone)]
pub struct ChangeInfo {
    /// The change's identifier.
    pub id: ChangeId,
    /// Web URL.
    pub url: String,
    /// Lifecycle state.
    pub state: ChangeState,
    /// Source branch name.
    pub head: String,
    /// Destination branch name.
    pub base: String,
    /// Title.
    pub subject: String,
    /// Body, if any.
    pub body: Option<String>,
    /// Draft flag.
    pub draft: bool,
}

/// A comment on a change request.
#[derive(Debug, Clone)]
pub struct ChangeComment {
    /// Comment identifier, for later update or delete.
    pub id: u64,
    /// Comment body.
    pub body: String,
}

/// Filter for [`Repository::list_change_comments`].
#[derive(Debug, Default)]
pub struct ListChangeCommentsOptions {
    /// Keep only comments whose body matches every one of these patterns
    /// (conjunction).
    pub body_matches_all: Vec<Regex>,
}

impl ListChangeCommentsOptions {
    /// Whether a comment body passes the filter.
    pub fn matches(&self, body: &str) -> bool {
        self.body_matches_all.iter().all(|re| re.is_match(body))
    }
}

/// Forge identity and change-id marshalling.
///
/// Variants differ only here; everything behavioral lives on
/// [`Repository`].
pub trait Forge: Send + Sync {
    /// The forge name as stored in repository configuration
    /// (e.g. "github").
    fn name(&self) -> &'static str;

    /// The environment variable consulted first for a token
    /// (e.g. `GITHUB_TOKEN`).
    fn env_token_var(&self) -> &'static str;

    /// Parse a change id from its user-facing string form. Accepts the
    /// bare number and the forge's prefixed form.
    fn change_id_from_str(&self, s: &str) -> Result<ChangeId, ForgeError> {
        let digits = s.trim_start_matches(['#', '!']);
        digits
            .parse::<u64>()
            .map(ChangeId)
            .map_err(|_| ForgeError::NotFound(format!("invalid change id: {s}")))
    }

    /// Render a change id the way this forge's users write it.
    fn display_change_id(&self, id: ChangeId) -> String {
        format!("#{}", id.0)
    }
}

/// Per-repository forge operations.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The forge this repository belongs to.
    fn forge(&self) -> &dyn Forge;

    /// Submit a new change request.
    ///
    /// # Errors
    ///
    /// - [`ForgeError::UnsubmittedBase`] when the base branch does not
    ///   exist on the forge; the caller submits the base first
    async fn submit_change(
        &self,
        request: SubmitChangeRequest,
    ) -> Result<SubmittedChange, ForgeError>;

    /// Edit an existing change request. Absent options leave fields
    /// unchanged; the call is idempotent.
    async fn edit_change(&self, id: ChangeId, opts: EditChangeOptions) -> Result<(), ForgeError>;

    /// Merge a change request.
    async fn merge_change(&self, id: ChangeId) -> Result<(), ForgeError>;

    /// Close a change request without merging.
    async fn close_change(&self, id: ChangeId) -> Result<(), ForgeError>;

    /// Query the state of several changes at once.
    ///
    /// Returns exactly `ids.len()` states in input order, batched into one
    /// round trip where the protocol permits.
    async fn changes_states(&self, ids: &[ChangeId]) -> Result<Vec<ChangeState>, ForgeError>;

    /// Find a change by its id.
    async fn find_change_by_id(&self, id: ChangeId) -> Result<ChangeInfo, ForgeError>;

    /// List comments on a change, filtered server- or client-side by
    /// `opts`. Pagination is internal; results arrive in posting order.
    async fn list_change_comments(
        &self,
        id: ChangeId,
        opts: &ListChangeCommentsOptions,
    ) -> Result<Vec<ChangeComment>, ForgeError>;

    /// Post a new comment on a change. Returns the comment id.
    async fn post_change_comment(&self, id: ChangeId, body: &str) -> Result<u64, ForgeError>;

    /// Replace the body of an existing comment.
    async fn update_change_comment(
        &self,
        id: ChangeId,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ForgeError>;

    /// Delete a comment.
    async fn delete_change_comment(&self, id: ChangeId, comment_id: u64)
        -> Result<(), ForgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedForge;

    impl Forge for NamedForge {
        fn name(&self) -> &'static str {
            "named"
        }
        fn env_token_var(&self) -> &'static str {
            "NAMED_TOKEN"
        }
    }

    #[test]
    fn change_state_display() {
        assert_eq!(ChangeState::Open.to_string(), "open");
        assert_eq!(ChangeState::Closed.to_string(), "closed");
        assert_eq!(ChangeState::Merged.to_string(), "merged");
    }

    #[test]
    fn default_change_id_marshalling() {
        let forge = NamedForge;
        assert_eq!(forge.change_id_from_str("42").unwrap(), ChangeId(42));
        assert_eq!(forge.change_id_from_str("#42").unwrap(), ChangeId(42));
        assert!(forge.change_id_from_str("abc").is_err());
        assert_eq!(forge.display_change_id(ChangeId(7)), "#7");
    }

    #[test]
    fn edit_options_emptiness() {
        assert!(EditChangeOptions::default().is_empty());
        let opts = EditChangeOptions {
            base: Some("main".to_string()),
            ..Default::default()
        };
        assert!(!opts.is_empty());
    }

    #[test]
    fn comment_filter_is_conjunction() {
        let opts = ListChangeCommentsOptions {
            body_matches_all: vec![
                Regex::new("stack").unwrap(),
                Regex::new("navigation").unwrap(),
            ],
        };
        assert!(opts.matches("navigation of the stack"));
        assert!(!opts.matches("just the stack"));
        assert!(!opts.matches("unrelated"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let opts = ListChangeCommentsOptions::default();
        assert!(opts.matches("anything"));
    }
}

//! core::types
//!
//! Strong types for core domain concepts.
//!
//! - [`BranchName`] - Validated Git branch name
//! - [`Oid`] - Git object identifier (SHA)
//!
//! These types enforce validity at construction time: invalid values cannot
//! be represented, so the rest of the crate never re-validates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules (see
/// `git check-ref-format`): non-empty, no leading `.` or `-`, no trailing
/// `.lock` or `/`, no `..`, `@{`, `//`, control characters, or the
/// characters `space ~ ^ : \ ? * [`, and not exactly `@`.
///
/// # Example
///
/// ```
/// use strata::core::types::BranchName;
///
/// let name = BranchName::new("feature/my-branch").unwrap();
/// assert_eq!(name.as_str(), "feature/my-branch");
///
/// assert!(BranchName::new("invalid..name").is_err());
/// assert!(BranchName::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's
    /// refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        let fail = |msg: &str| Err(TypeError::InvalidBranchName(msg.to_string()));

        if name.is_empty() {
            return fail("branch name cannot be empty");
        }
        if name == "@" {
            return fail("branch name cannot be '@' (reserved)");
        }
        if name.starts_with('-') {
            return fail("branch name cannot start with '-'");
        }
        if name.ends_with('/') {
            return fail("branch name cannot end with '/'");
        }
        for pat in ["..", "@{", "//"] {
            if name.contains(pat) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{pat}'"
                )));
            }
        }
        const INVALID_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];
        for c in name.chars() {
            if INVALID_CHARS.contains(&c) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{c}'"
                )));
            }
            if c.is_ascii_control() {
                return fail("branch name cannot contain control characters");
            }
        }
        // Per-component rules (split by '/').
        for component in name.split('/') {
            if component.starts_with('.') {
                return fail("path component cannot start with '.'");
            }
            if component.ends_with(".lock") {
                return fail("path component cannot end with '.lock'");
            }
        }
        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Git object identifier (SHA-1 or SHA-256), normalized to lowercase.
///
/// # Example
///
/// ```
/// use strata::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a 40- or
    /// 64-character hex string.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Get an abbreviated form: the first `len` characters, clamped to the
    /// OID length.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod branch_name {
        use super::*;

        #[test]
        fn valid_branch_names() {
            assert!(BranchName::new("main").is_ok());
            assert!(BranchName::new("feature/foo").is_ok());
            assert!(BranchName::new("fix-123").is_ok());
            assert!(BranchName::new("user@feature").is_ok());
            assert!(BranchName::new("with.dot").is_ok());
        }

        #[test]
        fn invalid_branch_names() {
            assert!(BranchName::new("").is_err());
            assert!(BranchName::new("@").is_err());
            assert!(BranchName::new("-flag").is_err());
            assert!(BranchName::new(".hidden").is_err());
            assert!(BranchName::new("foo/.hidden").is_err());
            assert!(BranchName::new("branch.lock").is_err());
            assert!(BranchName::new("branch/").is_err());
            assert!(BranchName::new("bad..path").is_err());
            assert!(BranchName::new("foo@{bar").is_err());
            assert!(BranchName::new("foo//bar").is_err());
            assert!(BranchName::new("has space").is_err());
            assert!(BranchName::new("has~tilde").is_err());
            assert!(BranchName::new("has\nnewline").is_err());
        }

        #[test]
        fn ordering_is_lexicographic() {
            let a = BranchName::new("alpha").unwrap();
            let b = BranchName::new("beta").unwrap();
            assert!(a < b);
        }

        #[test]
        fn serde_roundtrip() {
            let name = BranchName::new("feature/test").unwrap();
            let json = serde_json::to_string(&name).unwrap();
            let parsed: BranchName = serde_json::from_str(&json).unwrap();
            assert_eq!(name, parsed);
        }

        #[test]
        fn serde_rejects_invalid() {
            assert!(serde_json::from_str::<BranchName>("\"bad..name\"").is_err());
        }
    }

    mod oid {
        use super::*;

        #[test]
        fn valid_sha1() {
            assert!(Oid::new("abc123def4567890abc123def4567890abc12345").is_ok());
        }

        #[test]
        fn valid_sha256() {
            let sha256 = "abc123def4567890abc123def4567890abc123def4567890abc123def456789a";
            assert!(Oid::new(sha256).is_ok());
        }

        #[test]
        fn normalizes_to_lowercase() {
            let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
            assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
        }

        #[test]
        fn short_form() {
            let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
            assert_eq!(oid.short(7), "abc123d");
            assert_eq!(oid.short(100), oid.as_str());
        }

        #[test]
        fn invalid_oids() {
            assert!(Oid::new("").is_err());
            assert!(Oid::new("tooshort").is_err());
            assert!(Oid::new("xyz123def4567890abc123def4567890abc12345").is_err());
        }
    }
}

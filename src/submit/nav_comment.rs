//! submit::nav_comment
//!
//! Pure functions for the stack navigation comment.
//!
//! # Design
//!
//! The navigation comment is posted on every change request in a stack and
//! regenerated on each submit. Its body always begins with
//! [`NAV_COMMENT_SENTINEL`], which [`nav_comment_patterns`] and CI guards
//! use to recognize managed change requests; the trailing
//! ``Merges into `<trunk>`.`` line is how CI recovers the trunk name from
//! a rendered comment.
//!
//! Both the sentinel and the trailer format are stable across versions:
//! changing either would break merge guards on historical change requests.
//!
//! # Example Output
//!
//! ```markdown
//! <!-- strata:navigation -->
//! This change is part of the following stack:
//!
//! - #10
//!     - #11 ◀
//!         - #12
//!
//! Merges into `main`.
//! ```

use regex::Regex;

/// First line of every navigation comment. Stable; see module docs.
pub const NAV_COMMENT_SENTINEL: &str = "<!-- strata:navigation -->";

/// Regex sources that all match a navigation comment body (conjunction).
const NAV_COMMENT_PATTERNS: [&str; 2] = [
    r"^<!-- strata:navigation -->",
    r"(?m)^Merges into `[^`]+`\.$",
];

/// Compiled patterns for `ListChangeCommentsOptions::body_matches_all`.
pub fn nav_comment_patterns() -> Vec<Regex> {
    NAV_COMMENT_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("navigation comment patterns are valid"))
        .collect()
}

/// One stack entry in the rendered comment, ordered bottom (nearest trunk)
/// first.
#[derive(Debug, Clone)]
pub struct NavEntry {
    /// Display label: the forge's change id form (`#10`, `!10`), or the
    /// branch name for an unsubmitted branch.
    pub label: String,
    /// Link target, when the change has a URL.
    pub url: Option<String>,
    /// Nesting depth below the stack bottom.
    pub depth: usize,
    /// Whether this entry is the change the comment is posted on.
    pub current: bool,
}

/// Render the navigation comment for one change request.
///
/// `entries` is the stack bottom-first; `trunk` is the integration branch
/// the bottom merges into.
pub fn render_nav_comment(entries: &[NavEntry], trunk: &str) -> String {
    let mut out = String::new();
    out.push_str(NAV_COMMENT_SENTINEL);
    out.push('\n');
    out.push_str("This change is part of the following stack:\n\n");

    for entry in entries {
        let link = match &entry.url {
            Some(url) => format!("[{}]({})", entry.label, url),
            None => entry.label.clone(),
        };
        out.push_str(&" ".repeat(entry.depth * 4));
        out.push_str("- ");
        out.push_str(&link);
        if entry.current {
            out.push_str(" ◀");
        }
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&format!("Merges into `{trunk}`.\n"));
    out
}

/// Whether a comment body is a navigation comment.
pub fn is_nav_comment(body: &str) -> bool {
    nav_comment_patterns().iter().all(|re| re.is_match(body))
}

/// Extract the trunk name from a rendered navigation comment.
///
/// Returns `None` when the body is not a navigation comment.
pub fn extract_trunk(body: &str) -> Option<String> {
    if !body.starts_with(NAV_COMMENT_SENTINEL) {
        return None;
    }
    let trailer = Regex::new(r"(?m)^Merges into `([^`]+)`\.$").expect("valid regex");
    trailer
        .captures(body)
        .map(|captures| captures[1].to_string())
}

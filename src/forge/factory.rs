//! forge::factory
//!
//! Forge selection and construction.
//!
//! # Design
//!
//! Commands call [`connect_repository`] instead of importing specific forge
//! implementations. The provider is chosen by parsing the remote URL; the
//! selection is a table lookup, and nothing outside this module branches on
//! forge identity.

use super::github::{parse_github_url, GitHubRepository};
use super::traits::{Forge, ForgeError, Repository};

#[cfg(feature = "bitbucket")]
use super::bitbucket::{parse_bitbucket_url, BitbucketRepository};
#[cfg(feature = "gitlab")]
use super::gitlab::{parse_gitlab_url, GitLabRepository};

/// Supported forge providers in this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgeProvider {
    /// GitHub (always available).
    GitHub,
    /// GitLab (requires the `gitlab` feature).
    #[cfg(feature = "gitlab")]
    GitLab,
    /// Bitbucket (requires the `bitbucket` feature).
    #[cfg(feature = "bitbucket")]
    Bitbucket,
}

impl ForgeProvider {
    /// All providers enabled in this build.
    pub fn all() -> &'static [ForgeProvider] {
        &[
            ForgeProvider::GitHub,
            #[cfg(feature = "gitlab")]
            ForgeProvider::GitLab,
            #[cfg(feature = "bitbucket")]
            ForgeProvider::Bitbucket,
        ]
    }

    /// The provider name as used in repository configuration.
    pub fn name(&self) -> &'static str {
        match self {
            ForgeProvider::GitHub => "github",
            #[cfg(feature = "gitlab")]
            ForgeProvider::GitLab => "gitlab",
            #[cfg(feature = "bitbucket")]
            ForgeProvider::Bitbucket => "bitbucket",
        }
    }

    /// Parse a provider name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "github" => Some(ForgeProvider::GitHub),
            #[cfg(feature = "gitlab")]
            "gitlab" => Some(ForgeProvider::GitLab),
            #[cfg(feature = "bitbucket")]
            "bitbucket" => Some(ForgeProvider::Bitbucket),
            _ => None,
        }
    }
}

impl std::fmt::Display for ForgeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The forge identity for a provider, for token lookup and change-id
/// marshalling before a repository connection exists.
pub fn forge_identity(provider: ForgeProvider) -> &'static dyn Forge {
    match provider {
        ForgeProvider::GitHub => &super::github::GitHub,
        #[cfg(feature = "gitlab")]
        ForgeProvider::GitLab => &super::gitlab::GitLab,
        #[cfg(feature = "bitbucket")]
        ForgeProvider::Bitbucket => &super::bitbucket::Bitbucket,
    }
}

/// Detect the provider from a remote URL.
pub fn detect_provider(remote_url: &str) -> Option<ForgeProvider> {
    if parse_github_url(remote_url).is_some() {
        return Some(ForgeProvider::GitHub);
    }
    #[cfg(feature = "gitlab")]
    if parse_gitlab_url(remote_url).is_some() {
        return Some(ForgeProvider::GitLab);
    }
    #[cfg(feature = "bitbucket")]
    if parse_bitbucket_url(remote_url).is_some() {
        return Some(ForgeProvider::Bitbucket);
    }
    None
}

/// Connect to the repository behind a remote URL.
///
/// # Arguments
///
/// * `remote_url` - Git remote URL (SSH or HTTPS form)
/// * `token` - Authentication token for the forge
/// * `provider_override` - Provider name to use instead of URL detection
///
/// # Errors
///
/// - [`ForgeError::NotFound`] when the URL matches no known forge or cannot
///   be parsed for the chosen provider
/// - [`ForgeError::Unsupported`] when the provider exists but is not
///   enabled in this build
pub fn connect_repository(
    remote_url: &str,
    token: &str,
    provider_override: Option<&str>,
) -> Result<Box<dyn Repository>, ForgeError> {
    let provider = match provider_override {
        Some(name) => resolve_override(name)?,
        None => detect_provider(remote_url).ok_or_else(|| {
            ForgeError::NotFound(format!(
                "could not detect a forge from remote URL '{}'; supported: {}",
                remote_url,
                available_providers()
            ))
        })?,
    };

    match provider {
        ForgeProvider::GitHub => GitHubRepository::from_remote_url(remote_url, token)
            .map(|r| Box::new(r) as Box<dyn Repository>)
            .ok_or_else(|| {
                ForgeError::NotFound(format!("'{remote_url}' is not a GitHub remote URL"))
            }),
        #[cfg(feature = "gitlab")]
        ForgeProvider::GitLab => GitLabRepository::from_remote_url(remote_url, token)
            .map(|r| Box::new(r) as Box<dyn Repository>)
            .ok_or_else(|| {
                ForgeError::NotFound(format!("'{remote_url}' is not a GitLab remote URL"))
            }),
        #[cfg(feature = "bitbucket")]
        ForgeProvider::Bitbucket => BitbucketRepository::from_remote_url(remote_url, token)
            .map(|r| Box::new(r) as Box<dyn Repository>)
            .ok_or_else(|| {
                ForgeError::NotFound(format!("'{remote_url}' is not a Bitbucket remote URL"))
            }),
    }
}

fn resolve_override(name: &str) -> Result<ForgeProvider, ForgeError> {
    if let Some(provider) = ForgeProvider::parse(name) {
        return Ok(provider);
    }
    if valid_forge_names().contains(&name.to_lowercase().as_str()) {
        return Err(ForgeError::Unsupported(format!(
            "forge '{name}' is not enabled in this build; rebuild with `--features {name}`"
        )));
    }
    Err(ForgeError::NotFound(format!(
        "unknown forge '{name}'; available: {}",
        available_providers()
    )))
}

fn available_providers() -> String {
    ForgeProvider::all()
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// All known forge names, enabled or not. Used for configuration
/// validation so a repository can name a forge before the feature is
/// compiled in.
pub fn valid_forge_names() -> &'static [&'static str] {
    &["github", "gitlab", "bitbucket", "shamhub"]
}

//! auth
//!
//! Forge credential resolution.
//!
//! Tokens are looked up in order: the forge's environment variable
//! (e.g. `GITHUB_TOKEN`), the file stash, then the OS credential manager.
//! `auth login` writes to the credential manager, falling back to the
//! stash when no manager is available; `auth logout` clears both. No core
//! state is ever read from the environment.

use thiserror::Error;

use crate::forge::Forge;
use crate::secrets::{FileSecretStore, KeychainSecretStore, SecretError, SecretStore};

/// Errors from credential resolution.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token could be found anywhere; log in first.
    #[error(
        "no {forge} token found; set {env_var} or run `strata auth login`"
    )]
    Missing { forge: String, env_var: String },

    /// A stored token was rejected by the forge; re-authenticate.
    #[error("stored {forge} token was rejected; run `strata auth login` again")]
    Invalid { forge: String },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// The forge's environment variable.
    Environment,
    /// The file stash.
    Stash,
    /// The OS credential manager.
    Keychain,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Environment => write!(f, "environment"),
            TokenSource::Stash => write!(f, "secret stash"),
            TokenSource::Keychain => write!(f, "OS credential manager"),
        }
    }
}

fn stash_key(forge: &dyn Forge) -> String {
    format!("{}.token", forge.name())
}

/// Resolve a token for a forge.
///
/// # Errors
///
/// - [`AuthError::Missing`] when no source has a token
pub fn resolve_token(forge: &dyn Forge) -> Result<(String, TokenSource), AuthError> {
    if let Ok(token) = std::env::var(forge.env_token_var()) {
        if !token.is_empty() {
            return Ok((token, TokenSource::Environment));
        }
    }

    let key = stash_key(forge);
    if let Some(token) = FileSecretStore::new()?.get(&key)? {
        return Ok((token, TokenSource::Stash));
    }

    match KeychainSecretStore::new().get(&key) {
        Ok(Some(token)) => return Ok((token, TokenSource::Keychain)),
        Ok(None) => {}
        // No credential manager on this machine; the stash already missed.
        Err(SecretError::ProviderUnavailable(_)) => {}
        Err(e) => return Err(e.into()),
    }

    Err(AuthError::Missing {
        forge: forge.name().to_string(),
        env_var: forge.env_token_var().to_string(),
    })
}

/// Store a token for a forge.
///
/// Prefers the OS credential manager; falls back to the file stash when
/// none is available. Returns where the token landed.
pub fn login(forge: &dyn Forge, token: &str) -> Result<TokenSource, AuthError> {
    let key = stash_key(forge);
    match KeychainSecretStore::new().set(&key, token) {
        Ok(()) => Ok(TokenSource::Keychain),
        Err(SecretError::ProviderUnavailable(_)) => {
            FileSecretStore::new()?.set(&key, token)?;
            Ok(TokenSource::Stash)
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove stored tokens for a forge from both writable stores.
pub fn logout(forge: &dyn Forge) -> Result<(), AuthError> {
    let key = stash_key(forge);
    match KeychainSecretStore::new().delete(&key) {
        Ok(()) | Err(SecretError::ProviderUnavailable(_)) => {}
        Err(e) => return Err(e.into()),
    }
    FileSecretStore::new()?.delete(&key)?;
    Ok(())
}

/// Report where a token would come from, without revealing it.
pub fn status(forge: &dyn Forge) -> Result<Option<TokenSource>, AuthError> {
    match resolve_token(forge) {
        Ok((_, source)) => Ok(Some(source)),
        Err(AuthError::Missing { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns a distinct env var; tests share one process.
    struct EnvForge;

    impl Forge for EnvForge {
        fn name(&self) -> &'static str {
            "envforge"
        }
        fn env_token_var(&self) -> &'static str {
            "STRATA_ENVFORGE_TOKEN"
        }
    }

    struct AbsentForge;

    impl Forge for AbsentForge {
        fn name(&self) -> &'static str {
            "absentforge"
        }
        fn env_token_var(&self) -> &'static str {
            "STRATA_ABSENTFORGE_TOKEN"
        }
    }

    #[test]
    fn env_var_wins() {
        std::env::set_var("STRATA_ENVFORGE_TOKEN", "env-token");
        let (token, source) = resolve_token(&EnvForge).unwrap();
        assert_eq!(token, "env-token");
        assert_eq!(source, TokenSource::Environment);
    }

    #[test]
    fn missing_token_names_env_var() {
        match resolve_token(&AbsentForge) {
            Err(AuthError::Missing { env_var, .. }) => {
                assert_eq!(env_var, "STRATA_ABSENTFORGE_TOKEN");
            }
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn token_source_display() {
        assert_eq!(TokenSource::Environment.to_string(), "environment");
        assert_eq!(TokenSource::Stash.to_string(), "secret stash");
        assert_eq!(
            TokenSource::Keychain.to_string(),
            "OS credential manager"
        );
    }
}

//! secrets::keychain_store
//!
//! OS credential manager storage via the `keyring` crate.
//!
//! Backed by the macOS Keychain, the Windows Credential Manager, or the
//! Secret Service on Linux. When no backend is available the store
//! reports [`SecretError::ProviderUnavailable`] and callers fall back to
//! the file stash.

use keyring::Entry;

use super::traits::{SecretError, SecretStore};

/// Service name under which entries are registered.
const SERVICE: &str = "strata";

/// Credential-manager-backed secret store.
#[derive(Debug, Default)]
pub struct KeychainSecretStore;

impl KeychainSecretStore {
    /// Create the store.
    pub fn new() -> Self {
        Self
    }

    fn entry(&self, key: &str) -> Result<Entry, SecretError> {
        Entry::new(SERVICE, key)
            .map_err(|e| SecretError::ProviderUnavailable(e.to_string()))
    }
}

impl SecretStore for KeychainSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::PlatformFailure(e)) => {
                Err(SecretError::ProviderUnavailable(e.to_string()))
            }
            Err(e) => Err(SecretError::Read(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        match self.entry(key)?.set_password(value) {
            Ok(()) => Ok(()),
            Err(keyring::Error::PlatformFailure(e)) => {
                Err(SecretError::ProviderUnavailable(e.to_string()))
            }
            Err(e) => Err(SecretError::Write(e.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<(), SecretError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(keyring::Error::PlatformFailure(e)) => {
                Err(SecretError::ProviderUnavailable(e.to_string()))
            }
            Err(e) => Err(SecretError::Delete(e.to_string())),
        }
    }
}

//! secrets::traits
//!
//! Secret storage trait definition.
//!
//! Keys are namespaced strings like "github.token". Implementations MUST
//! never log, print, or include secret values in error messages, and must
//! be thread-safe.

use thiserror::Error;

/// Errors from secret storage operations.
///
/// Error messages intentionally never include secret values.
#[derive(Debug, Error)]
pub enum SecretError {
    /// Failed to read from secret storage.
    #[error("failed to read secret: {0}")]
    Read(String),

    /// Failed to write to secret storage.
    #[error("failed to write secret: {0}")]
    Write(String),

    /// Failed to delete from secret storage.
    #[error("failed to delete secret: {0}")]
    Delete(String),

    /// Provider not available on this system.
    #[error("secret provider not available: {0}")]
    ProviderUnavailable(String),
}

/// A key-value store for secrets.
pub trait SecretStore: Send + Sync {
    /// Get a secret. `Ok(None)` means the key is not stored.
    fn get(&self, key: &str) -> Result<Option<String>, SecretError>;

    /// Store a secret, overwriting any existing value.
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError>;

    /// Delete a secret. Idempotent: deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), SecretError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_operation_not_value() {
        assert!(SecretError::Read("disk error".into())
            .to_string()
            .contains("read"));
        assert!(SecretError::Write("disk error".into())
            .to_string()
            .contains("write"));
        assert!(SecretError::Delete("disk error".into())
            .to_string()
            .contains("delete"));
    }
}

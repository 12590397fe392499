//! secrets::file_store
//!
//! File-based secret stash.
//!
//! # Security
//!
//! - Secrets live in `~/.config/strata/secrets.toml`
//! - Permissions are 0600 on Unix (owner read/write only)
//! - Writes are atomic (temp file + rename) and serialized with an
//!   exclusive flock on the stash directory

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use fs2::FileExt;

use super::traits::{SecretError, SecretStore};

/// File-backed secret stash. The fallback when no OS credential manager
/// is available.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    /// Create a stash at the default location
    /// (`~/.config/strata/secrets.toml`).
    pub fn new() -> Result<Self, SecretError> {
        let config = dirs::config_dir()
            .ok_or_else(|| SecretError::Read("cannot determine config directory".into()))?;
        Ok(Self {
            path: config.join("strata").join("secrets.toml"),
        })
    }

    /// Create a stash at a custom path. Primarily for tests.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the stash file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, SecretError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| SecretError::Read(format!("cannot read stash: {e}")))?;
        toml::from_str(&content).map_err(|e| SecretError::Read(format!("cannot parse stash: {e}")))
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<(), SecretError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SecretError::Write("stash path has no parent".into()))?;
        fs::create_dir_all(parent)
            .map_err(|e| SecretError::Write(format!("cannot create directory: {e}")))?;

        // Serialize concurrent writers on a lock file next to the stash.
        let lock_path = self.path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SecretError::Write(format!("cannot open lock file: {e}")))?;
        lock.lock_exclusive()
            .map_err(|e| SecretError::Write(format!("cannot lock stash: {e}")))?;

        let result = self.write_locked(secrets);
        let _ = fs2::FileExt::unlock(&lock);
        result
    }

    fn write_locked(&self, secrets: &BTreeMap<String, String>) -> Result<(), SecretError> {
        let content = toml::to_string_pretty(secrets)
            .map_err(|e| SecretError::Write(format!("cannot serialize stash: {e}")))?;

        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| SecretError::Write(format!("cannot create temp file: {e}")))?;

            // Restrict before content hits the disk.
            #[cfg(unix)]
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| SecretError::Write(format!("cannot set permissions: {e}")))?;

            file.write_all(content.as_bytes())
                .map_err(|e| SecretError::Write(format!("cannot write stash: {e}")))?;
            file.sync_all()
                .map_err(|e| SecretError::Write(format!("cannot sync stash: {e}")))?;
        }
        fs::rename(&temp_path, &self.path)
            .map_err(|e| SecretError::Write(format!("cannot rename temp file: {e}")))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        let mut secrets = self.read_all()?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_all(&secrets)
    }

    fn delete(&self, key: &str) -> Result<(), SecretError> {
        let mut secrets = self.read_all()?;
        secrets.remove(key);
        self.write_all(&secrets)
    }
}

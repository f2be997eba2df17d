//! Saved-state storage
//!
//! A small key-value store over JSON files in the application config
//! directory. Each key maps to one file. Loading fails soft: a missing,
//! unreadable, or corrupt entry behaves as if nothing was saved, and corrupt
//! entries are deleted so they cannot break the next startup either.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Storage key for the single-mode session record
pub(crate) const SESSION_KEY: &str = "single_session";

/// Storage key for the batch transcription history
pub(crate) const BATCH_KEY: &str = "batch_sessions";

/// Storage key for the API credential
pub(crate) const CREDENTIAL_KEY: &str = "api_key";

/// File-backed key-value store
#[derive(Debug, Clone)]
pub(crate) struct Store {
    root: PathBuf,
}

impl Store {
    /// Open the store at the default location in the user config directory
    pub(crate) fn open_default() -> Result<Self, StoreError> {
        let root = dirs::config_dir()
            .ok_or(StoreError::NoConfigDir)?
            .join("retell");
        Ok(Self { root })
    }

    /// Open a store rooted at an explicit directory
    pub(crate) fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Save a value under a key, creating the store directory if needed
    pub(crate) fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            info!("Created store directory: {:?}", self.root);
        }

        let json = serde_json::to_string_pretty(value)?;
        fs::write(self.path_for(key), json)?;
        Ok(())
    }

    /// Load a value, or `None` if absent or unusable
    ///
    /// A read or parse failure is logged, the entry is deleted, and the
    /// caller proceeds as if nothing was saved.
    pub(crate) fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read saved entry {:?}: {}", key, e);
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding corrupt saved entry {:?}: {}", key, e);
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Remove a key; removing an absent key is not an error
    pub(crate) fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a key currently has a stored entry
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

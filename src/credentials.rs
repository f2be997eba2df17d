//! API credential storage
//!
//! The Gemini API key has its own lifecycle, independent of any saved
//! session: entered once, kept until the user explicitly clears it. It is
//! stored in its own file in the config directory and cleared from memory
//! on drop.

use crate::store::{Store, CREDENTIAL_KEY};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Stored credential shape
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    api_key: String,
}

/// An API key held in memory
///
/// The inner string is zeroed when the value is dropped.
pub(crate) struct ApiKey(String);

impl ApiKey {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key itself
        f.write_str("ApiKey(***)")
    }
}

/// Store the API key
pub(crate) fn store_api_key(store: &Store, key: &str) -> Result<(), CredentialError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(CredentialError::EmptyKey);
    }
    let mut record = StoredCredential {
        api_key: key.to_string(),
    };
    let result = store
        .save(CREDENTIAL_KEY, &record)
        .map_err(|e| CredentialError::Store(e.to_string()));
    record.api_key.zeroize();
    result
}

/// Load the API key, if one has been stored
pub(crate) fn load_api_key(store: &Store) -> Option<ApiKey> {
    let mut record: StoredCredential = store.load(CREDENTIAL_KEY)?;
    let key = ApiKey::new(record.api_key.as_str());
    record.api_key.zeroize();
    if key.as_str().is_empty() {
        return None;
    }
    Some(key)
}

/// Delete the stored API key
pub(crate) fn delete_api_key(store: &Store) -> Result<(), CredentialError> {
    store
        .remove(CREDENTIAL_KEY)
        .map_err(|e| CredentialError::Delete(e.to_string()))
}

/// Credential storage errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum CredentialError {
    #[error("API key cannot be empty")]
    EmptyKey,

    #[error("Failed to store credential: {0}")]
    Store(String),

    #[error("Failed to delete credential: {0}")]
    Delete(String),
}

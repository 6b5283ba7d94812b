//! Credential pair API on top of a storage backend.

use crate::{SecureStorage, StorageKeys, StorageResult};
use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

/// Access + refresh token pair. Both values are opaque to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Token values never end up in logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Token Store: durable storage for the access/refresh credential pair.
///
/// Pair writes and deletes go through one lock, and through the backend's
/// batch operations, so other components never observe half of a pair.
pub struct TokenStore {
    storage: Box<dyn SecureStorage>,
    pair_lock: Mutex<()>,
}

impl TokenStore {
    /// Create a token store over the given backend.
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self {
            storage,
            pair_lock: Mutex::new(()),
        }
    }

    /// Read a single entry by name.
    pub fn get(&self, name: &str) -> StorageResult<Option<String>> {
        let _guard = self.pair_lock.lock();
        self.storage.get(name)
    }

    /// Write a single entry by name.
    ///
    /// Writing one half of the credential pair leaves the caller responsible
    /// for writing the other; prefer [`TokenStore::set_pair`].
    pub fn set(&self, name: &str, value: &str) -> StorageResult<()> {
        let _guard = self.pair_lock.lock();
        self.storage.set(name, value)
    }

    /// Current access token, if any.
    pub fn access_token(&self) -> StorageResult<Option<String>> {
        self.get(StorageKeys::ACCESS_TOKEN)
    }

    /// Current refresh token, if any.
    pub fn refresh_token(&self) -> StorageResult<Option<String>> {
        self.get(StorageKeys::REFRESH_TOKEN)
    }

    /// Both tokens, or `None` unless both are present.
    pub fn pair(&self) -> StorageResult<Option<TokenPair>> {
        let _guard = self.pair_lock.lock();
        let access = self.storage.get(StorageKeys::ACCESS_TOKEN)?;
        let refresh = self.storage.get(StorageKeys::REFRESH_TOKEN)?;
        Ok(match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Some(TokenPair {
                access_token,
                refresh_token,
            }),
            _ => None,
        })
    }

    /// Replace both tokens together.
    pub fn set_pair(&self, pair: &TokenPair) -> StorageResult<()> {
        let _guard = self.pair_lock.lock();
        self.storage.set_many(&[
            (StorageKeys::ACCESS_TOKEN, pair.access_token.as_str()),
            (StorageKeys::REFRESH_TOKEN, pair.refresh_token.as_str()),
        ])?;
        debug!("Stored credential pair");
        Ok(())
    }

    /// Delete both tokens together.
    pub fn clear(&self) -> StorageResult<()> {
        let _guard = self.pair_lock.lock();
        self.storage.delete_many(&StorageKeys::CREDENTIAL_PAIR)?;
        debug!("Cleared credential pair");
        Ok(())
    }

    /// True if an access token is stored.
    pub fn has_session(&self) -> StorageResult<bool> {
        Ok(self.access_token()?.is_some())
    }
}

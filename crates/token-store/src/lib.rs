//! Token storage for the pgAnalytics client.
//!
//! This crate provides:
//! - `SecureStorage`: the backend trait for durable key/value storage
//! - `FileStorage`: a JSON file under `~/.pganalytics` that survives restarts
//! - `MemoryStorage`: a process-local backend for tests and ephemeral runs
//! - `TokenStore`: paired reads and writes of the access/refresh credentials

mod file;
mod keys;
mod memory;
mod token_store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use token_store::{TokenPair, TokenStore};
pub use traits::SecureStorage;

use pga_core::Paths;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default durable storage at the credentials file location.
pub fn create_storage(paths: &Paths) -> StorageResult<Box<dyn SecureStorage>> {
    let storage = FileStorage::open(paths.credentials_file())?;
    Ok(Box::new(storage))
}

/// Create a TokenStore with the default durable storage.
pub fn create_token_store(paths: &Paths) -> StorageResult<TokenStore> {
    let storage = create_storage(paths)?;
    Ok(TokenStore::new(storage))
}

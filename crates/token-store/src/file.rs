//! File-backed durable storage.

use crate::{SecureStorage, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable storage backed by a single JSON object file.
///
/// The file is read once on open and cached. Every mutation rewrites the
/// whole file through a temporary sibling that is renamed into place, so a
/// crash never leaves a half-written file behind.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file, creating an empty store if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    StorageError::Encoding(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened file storage");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            restrict_permissions(&file)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    /// Apply a mutation and persist it. The cache is only updated once the
    /// write succeeded.
    fn mutate<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> StorageResult<T> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        let result = f(&mut next);
        if next != *entries {
            self.persist(&next)?;
            *entries = next;
        }
        Ok(result)
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> StorageResult<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> StorageResult<()> {
    Ok(())
}

impl SecureStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(key = %key, "Setting entry");
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        debug!(key = %key, "Deleting entry");
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn set_many(&self, items: &[(&str, &str)]) -> StorageResult<()> {
        self.mutate(|entries| {
            for (key, value) in items {
                entries.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        self.mutate(|entries| {
            for key in keys {
                entries.remove(*key);
            }
        })
    }
}

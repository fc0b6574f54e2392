//! Atomic per-key JSON storage.
//!
//! Each key is one JSON file inside the store directory. Writes go through a
//! temp file and rename so a crash never leaves a half-written value behind.
//! Values that fail to parse on read are treated as absent rather than
//! poisoning every caller.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key '{key}'")]
    InvalidKey { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-backed key-value store. One JSON file per key.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Read the value stored under `key`, or `None` if absent.
    ///
    /// A value that exists but no longer parses is logged and reported as
    /// absent so one corrupt entry cannot wedge the caller.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.key_path(key)?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("discarding unreadable value for key '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    /// Write `value` under `key` (atomic: .tmp → rename).
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Delete the value under `key`. Returns whether a value existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a value exists under `key`.
    pub async fn has(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.key_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

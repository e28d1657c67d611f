//! Key/value persistence medium
//!
//! The engine never talks to a concrete medium directly; it goes through
//! [`KeyValueStore`]. Two implementations ship with the crate:
//! - [`MemoryStore`]: process-local, used by tests and embedders
//! - [`JsonFileStore`]: a single JSON object on disk, used by the CLI

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Medium errors. The engine logs these and degrades; they never reach
/// engine callers.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Abstract key/value medium.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    fn list_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory medium
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn list_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON file medium
// ─────────────────────────────────────────────────────────────────────────────

/// Default filename for the CLI store
pub const STORE_FILE: &str = "overrides.json";

/// On-disk format
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    entries: BTreeMap<String, String>,
    /// Schema version for migration
    #[serde(default = "default_version")]
    version: u32,
}

fn default_version() -> u32 {
    1
}

/// Key/value medium persisted as one JSON document.
///
/// Every operation re-reads the file so that several processes sharing the
/// file observe each other's writes.
pub struct JsonFileStore {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create storage with default location (`~/.config/imo/overrides.json`)
    pub fn new() -> io::Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?
            .join(".config")
            .join("imo");
        Ok(Self::with_path(dir.join(STORE_FILE)))
    }

    /// Create storage with custom file path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file_path: path,
            lock: Mutex::new(()),
        }
    }

    /// Get the storage file path
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn read_contents(&self) -> Result<FileContents, StorageError> {
        if !self.file_path.exists() {
            return Ok(FileContents::default());
        }
        let content = fs::read_to_string(&self.file_path)?;
        if content.trim().is_empty() {
            return Ok(FileContents::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_contents(&self, contents: &FileContents) -> Result<(), StorageError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(contents)?;
        let tmp = self.file_path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut FileContents)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut contents = self.read_contents()?;
        f(&mut contents);
        self.write_contents(&contents)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_contents()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(|contents| {
            contents.entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(|contents| {
            contents.entries.remove(key);
        })
    }

    fn list_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        Ok(self
            .read_contents()?
            .entries
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }
}

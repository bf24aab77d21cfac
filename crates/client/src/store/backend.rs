//! Storage backends.
//!
//! A backend is a flat string-to-string map; everything it holds is already
//! encrypted by the time it arrives here. [`MemoryBackend`] backs the
//! session scope, [`FileBackend`] the durable scope.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::StoreError;

/// Minimal interface the secure store needs from a scope's storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn write(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently present, unfiltered.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Total stored bytes (keys plus values) under the given prefix.
    async fn used_bytes(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Process-lifetime backend for the session scope.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn used_bytes(&self, prefix: &str) -> Result<usize, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| k.len() + v.len())
            .sum())
    }
}

/// Durable backend persisting all entries as one JSON document on disk.
///
/// A single document keeps quota estimation and atomic replacement simple.
/// The in-memory map is authoritative; the file is rewritten on every
/// mutation via a temp-file rename.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileBackend {
    /// Open (or create) the backing file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Backend(format!("read {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Backend(format!("parse {}: {e}", path.display())))?
            }
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "opened durable storage");
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serialized)
            .map_err(|e| StoreError::Backend(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Backend(format!("rename {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn used_bytes(&self, prefix: &str) -> Result<usize, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| k.len() + v.len())
            .sum())
    }
}

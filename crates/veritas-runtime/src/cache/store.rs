//! Persistence for cache snapshots.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::PersistedEntry;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache store data is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable home for cache snapshots.
#[async_trait]
pub trait CacheStore<V>: Send + Sync {
    async fn load(&self) -> Result<Vec<PersistedEntry<V>>, CacheError>;

    /// Replace the stored snapshot with `entries`.
    async fn save(&self, entries: &[PersistedEntry<V>]) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

/// Keeps the last saved snapshot in memory.
pub struct MemoryStore<V> {
    entries: Mutex<Vec<PersistedEntry<V>>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn load(&self) -> Result<Vec<PersistedEntry<V>>, CacheError> {
        Ok(self.entries.lock().clone())
    }

    async fn save(&self, entries: &[PersistedEntry<V>]) -> Result<(), CacheError> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Stores the snapshot as one JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl<V> CacheStore<V> for JsonFileStore
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self) -> Result<Vec<PersistedEntry<V>>, CacheError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn save(&self, entries: &[PersistedEntry<V>]) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "cache snapshot saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

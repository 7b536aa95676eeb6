//! Durable key-value storage
//!
//! Values are YAML documents stored under string keys. [`FileStore`] keeps one
//! `{key}.yaml` file per entry in a directory; [`MemoryStore`] keeps everything in a
//! map and is lost with the process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const FILE_EXTENSION: &str = "yaml";

/// Errors from durable storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage path pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// A listed entry. Entries that cannot be read are reported one by one so a single bad
/// value does not hide the rest.
pub type StoredEntry = (String, Result<String, StorageError>);

/// Key-value store contract
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError>;

    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Removing a missing key is not an error
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Every entry. `Err` only when the store itself cannot be listed.
    async fn list_all(&self) -> Result<Vec<StoredEntry>, StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;
}

/// One YAML file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.{FILE_EXTENSION}")))
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, StorageError> {
        let pattern = self.dir.join(format!("*.{FILE_EXTENSION}"));
        let mut paths = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())? {
            match entry {
                Ok(path) => paths.push(path),
                Err(e) => warn!("Skipping unreadable storage entry: {e}"),
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, value).await?;
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list_all(&self) -> Result<Vec<StoredEntry>, StorageError> {
        let mut entries = Vec::new();
        for path in self.entry_paths()? {
            let Some(key) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(StorageError::from);
            if let Err(e) = &content {
                warn!(path = %path.display(), error = %e, "Unreadable storage entry");
            }
            entries.push((key, content));
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        for path in self.entry_paths()? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredEntry>, StorageError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), Ok(entry.value().clone())))
            .collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }
}

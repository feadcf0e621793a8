//! Filesystem cache backend

use super::{CacheBackend, CacheBackendError, CacheKey};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Cache stored on disk with 2-char sharding
///
/// Layout: `<root>/entries/<first 2 hex chars>/<remaining hex chars>`
pub struct FsCacheBackend {
    entries_dir: PathBuf,
}

impl FsCacheBackend {
    /// Open a cache rooted at `root`, creating `root/entries/` if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self, CacheBackendError> {
        let entries_dir = root.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)?;
        Ok(Self { entries_dir })
    }

    /// Open the cache under the platform cache directory
    pub fn with_default_path() -> Result<Self, CacheBackendError> {
        let root = dirs::cache_dir()
            .ok_or_else(|| CacheBackendError::Unavailable("no cache directory".into()))?
            .join("pipeline-orchestrator");
        Self::new(root)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.as_str();
        let split = hex.len().min(2);
        self.entries_dir.join(&hex[..split]).join(&hex[split..])
    }

    fn write_atomic(path: &Path, blob: &[u8]) -> Result<(), CacheBackendError> {
        let shard_dir = path
            .parent()
            .ok_or_else(|| CacheBackendError::Unavailable("invalid entry path".into()))?;
        fs::create_dir_all(shard_dir)?;

        // Write to a temp file in the same directory, then rename over the entry
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(blob)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FsCacheBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheBackendError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &CacheKey, blob: Vec<u8>) -> Result<(), CacheBackendError> {
        let path = self.entry_path(key);
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &blob))
            .await
            .map_err(|e| CacheBackendError::Unavailable(e.to_string()))?
    }
}

//! In-memory cache backend

use super::{CacheBackend, CacheBackendError, CacheKey};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local cache, lost when the process exits
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheBackendError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, blob: Vec<u8>) -> Result<(), CacheBackendError> {
        self.entries.write().await.insert(key.clone(), blob);
        Ok(())
    }
}

//! Result cache: key derivation, backends and the cache manager
//!
//! A job's cache key covers its stage identity, command, matrix
//! combination, input fingerprint and the keys of its upstream jobs, so a
//! change anywhere upstream invalidates everything downstream.

pub mod fingerprint;
pub mod fs;
pub mod memory;

pub use fingerprint::{FileFingerprinter, InputFingerprinter};
pub use fs::FsCacheBackend;
pub use memory::InMemoryCacheBackend;

use crate::core::{Job, JobGraph};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Bumped whenever the key document layout changes
const KEY_FORMAT_VERSION: u32 = 1;

/// Deterministic, content-derived cache key (hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key of a job from its identity and its dependencies' keys
    pub fn for_job(job: &Job, dependency_keys: &[&CacheKey]) -> Self {
        let document = serde_json::json!({
            "version": KEY_FORMAT_VERSION,
            "stage": job.stage,
            "command": job.command,
            "combination": job
                .combination
                .iter()
                .map(|(axis, value)| [axis, value])
                .collect::<Vec<_>>(),
            "inputs": job.input_fingerprint,
            "upstream": dependency_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        });

        // Field order of the document is fixed, so the serialization is canonical
        let digest = Sha256::digest(document.to_string().as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from cache backends
#[derive(Debug, Error)]
pub enum CacheBackendError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage for cached job results
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch the blob stored under `key`, if any
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheBackendError>;

    /// Store a blob; concurrent writes to the same key are last writer wins
    async fn put(&self, key: &CacheKey, blob: Vec<u8>) -> Result<(), CacheBackendError>;
}

/// The blob stored for a successful job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResult {
    pub job_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,

    pub stored_at: DateTime<Utc>,

    pub success: bool,
}

impl CachedResult {
    pub fn success(job_id: impl Into<String>, output_ref: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            output_ref,
            stored_at: Utc::now(),
            success: true,
        }
    }
}

/// Looks up and stores job results, degrading every backend problem to a miss
#[derive(Clone)]
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    lookup_timeout: Duration,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            lookup_timeout: crate::core::DEFAULT_CACHE_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Cache keys of every job, indexed like the graph
    ///
    /// Jobs are in expansion order, so dependency keys are always computed
    /// before the keys that include them.
    pub fn compute_keys(graph: &JobGraph) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = Vec::with_capacity(graph.len());
        for job in graph.jobs() {
            let deps: Vec<&CacheKey> = job.dependencies.iter().map(|&d| &keys[d]).collect();
            let key = CacheKey::for_job(job, &deps);
            keys.push(key);
        }
        keys
    }

    /// Look up a successful result; any error, timeout or bad blob is a miss
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedResult> {
        let blob = match tokio::time::timeout(self.lookup_timeout, self.backend.get(key)).await {
            Ok(Ok(Some(blob))) => blob,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                return None;
            }
            Err(_) => {
                warn!(
                    "Cache lookup for {} exceeded {:?}, treating as miss",
                    key, self.lookup_timeout
                );
                return None;
            }
        };

        match serde_json::from_slice::<CachedResult>(&blob) {
            Ok(result) if result.success => {
                debug!("Cache hit for {} ({})", result.job_id, key);
                Some(result)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Store a successful result; failures are logged and otherwise ignored
    pub async fn store(&self, key: &CacheKey, result: &CachedResult) {
        let blob = match serde_json::to_vec(result) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to encode cache entry for {}: {}", result.job_id, e);
                return;
            }
        };

        if let Err(e) = self.backend.put(key, blob).await {
            warn!("Cache store failed for {}: {}", result.job_id, e);
        }
    }
}

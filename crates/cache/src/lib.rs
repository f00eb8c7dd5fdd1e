//! Fingerprint-keyed response cache for promptgate.
//!
//! Caching is an optimization, never a correctness dependency: every backend
//! failure is logged and turned into a miss or a no-op.

pub mod backend;
pub mod fingerprint;

use std::sync::Arc;
use std::time::Duration;

use promptgate_config::{CacheBackend, CacheConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use backend::{DisabledKv, KvBackend, MemoryKv, RedisKv, UnreachableKv};
pub use fingerprint::RequestFingerprint;

/// Backend status as reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHealth {
    Up,
    Down,
    Disabled,
}

impl CacheHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheHealth::Up => "up",
            CacheHealth::Down => "down",
            CacheHealth::Disabled => "disabled",
        }
    }
}

#[derive(Clone)]
pub struct FingerprintCache {
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
}

impl FingerprintCache {
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledKv), Duration::ZERO)
    }

    /// Build the cache selected by `config`. An unreachable Redis does not
    /// fail startup; the cache runs degraded.
    pub async fn open(config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        let backend: Arc<dyn KvBackend> = match config.backend {
            CacheBackend::None => Arc::new(DisabledKv),
            CacheBackend::Memory => Arc::new(MemoryKv::default()),
            CacheBackend::Redis => {
                let url = config.redis_url.as_deref().unwrap_or_default();
                match RedisKv::connect(url).await {
                    Ok(kv) => Arc::new(kv),
                    Err(e) => {
                        warn!(error = %e, "Cache backend unreachable, running without cache");
                        Arc::new(UnreachableKv::new(e.to_string()))
                    }
                }
            }
        };
        Self::new(backend, ttl)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a cached value. Backend errors and undecodable entries are misses.
    pub async fn lookup<T: DeserializeOwned>(&self, fingerprint: &RequestFingerprint) -> Option<T> {
        let key = fingerprint.key();
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Store a value under the fingerprint with the configured TTL.
    pub async fn store<T: Serialize + Sync>(&self, fingerprint: &RequestFingerprint, value: &T) {
        let key = fingerprint.key();
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache serialization failed");
                return;
            }
        };
        if let Err(e) = self.backend.set_ex(&key, bytes, self.ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, fingerprint: &RequestFingerprint) {
        let key = fingerprint.key();
        if let Err(e) = self.backend.del(&key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }

    pub async fn health(&self) -> CacheHealth {
        if self.backend.name() == "none" {
            return CacheHealth::Disabled;
        }
        match self.backend.ping().await {
            Ok(()) => CacheHealth::Up,
            Err(_) => CacheHealth::Down,
        }
    }
}

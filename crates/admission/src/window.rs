//! Sliding-window stores.
//!
//! Both stores track request timestamps per identity over a trailing window.
//! They differ in when a request is recorded: the shared store inserts first
//! and counts after (so rejected requests still occupy the window), the local
//! store only records admitted requests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use promptgate_core::error::AdmissionError;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::time::Instant;
use tracing::info;

/// Result of recording one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    pub admitted: bool,
    /// Requests inside the window after this call.
    pub count: u32,
}

#[async_trait]
pub trait WindowStore: Send + Sync {
    fn name(&self) -> &str;

    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, AdmissionError>;
}

// --- Shared (Redis sorted set) ---

/// Sorted-set window shared by every gateway instance.
///
/// Evict, insert, count and expire run as one MULTI/EXEC transaction so two
/// concurrent requests from one identity cannot both see room under the limit.
pub struct RedisWindowStore {
    manager: ConnectionManager,
    expiry_buffer: Duration,
    seq: AtomicU64,
}

impl RedisWindowStore {
    pub async fn connect(url: &str, expiry_buffer: Duration) -> Result<Self, AdmissionError> {
        let client = redis::Client::open(url)
            .map_err(|e| AdmissionError::Backend(format!("invalid Redis URL: {e}")))?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(2))
            .set_response_timeout(Duration::from_secs(2))
            .set_number_of_retries(1);
        let manager = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| AdmissionError::Backend(format!("Redis connection failed: {e}")))?;
        info!("Connected to Redis admission store");
        Ok(Self {
            manager,
            expiry_buffer,
            seq: AtomicU64::new(0),
        })
    }

    fn now_micros() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, AdmissionError> {
        let now = Self::now_micros();
        let window_start = now - window.as_micros() as i64;
        // Two requests in the same microsecond must stay distinct members.
        let member = format!("{now}-{}", self.seq.fetch_add(1, Ordering::Relaxed));
        let ttl = (window + self.expiry_buffer).as_secs().max(1) as i64;

        let mut conn = self.manager.clone();
        let (count,): (u32,) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, window_start)
            .ignore()
            .zadd(key, member, now)
            .ignore()
            .zcard(key)
            .expire(key, ttl)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| AdmissionError::Backend(e.to_string()))?;

        Ok(WindowOutcome {
            admitted: count <= limit,
            count,
        })
    }
}

// --- Local (single process) ---

/// Identity to admitted-request timestamps, behind one mutex.
pub struct LocalWindowStore {
    clients: Mutex<HashMap<String, Vec<Instant>>>,
}

impl LocalWindowStore {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for LocalWindowStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, AdmissionError> {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        // Periodic cleanup: if map grows too large, evict idle identities
        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < window)
            });
        }

        let timestamps = clients.entry(key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= limit as usize {
            return Ok(WindowOutcome {
                admitted: false,
                count: timestamps.len() as u32,
            });
        }

        timestamps.push(now);
        Ok(WindowOutcome {
            admitted: true,
            count: timestamps.len() as u32,
        })
    }
}

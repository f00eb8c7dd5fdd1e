//! Sliding-window admission control for promptgate.
//!
//! Every pipeline entry passes through [`AdmissionController::allow`]. The
//! window store is pluggable: a Redis sorted set shared by all instances, or
//! a mutex-guarded map for single-process deployments. When the shared store
//! fails mid-flight the controller admits the request (fail-open).

pub mod window;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use promptgate_config::{RateLimitBackend, RateLimitConfig};
use tracing::warn;

pub use window::{LocalWindowStore, RedisWindowStore, WindowOutcome, WindowStore};

/// The outcome of one admission check, with everything the response
/// headers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub admitted: bool,
    pub limit: u32,
    /// Floored at zero.
    pub remaining: u32,
    /// Set only on denial.
    pub retry_after: Option<Duration>,
}

pub struct AdmissionController {
    store: Arc<dyn WindowStore>,
    limit: u32,
    window: Duration,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn WindowStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// Single-process controller.
    pub fn local(limit: u32, window: Duration) -> Self {
        Self::new(Arc::new(LocalWindowStore::new()), limit, window)
    }

    /// Build the controller selected by `config`. An unreachable Redis at
    /// startup falls back to the local store.
    pub async fn open(config: &RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_secs);
        let store: Arc<dyn WindowStore> = match config.backend {
            RateLimitBackend::Local => Arc::new(LocalWindowStore::new()),
            RateLimitBackend::Redis => {
                let url = config.redis_url.as_deref().unwrap_or_default();
                let buffer = Duration::from_secs(config.expiry_buffer_secs);
                match RedisWindowStore::connect(url, buffer).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        warn!(error = %e, "Shared admission store unreachable, using local windows");
                        Arc::new(LocalWindowStore::new())
                    }
                }
            }
        };
        Self::new(store, config.max_requests, window)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn backend_name(&self) -> &str {
        self.store.name()
    }

    /// Check and record one request for `identity`.
    pub async fn allow(&self, identity: &str) -> AdmissionDecision {
        match self.store.hit(identity, self.limit, self.window).await {
            Ok(outcome) if outcome.admitted => AdmissionDecision {
                admitted: true,
                limit: self.limit,
                remaining: self.limit.saturating_sub(outcome.count),
                retry_after: None,
            },
            Ok(_) => AdmissionDecision {
                admitted: false,
                limit: self.limit,
                remaining: 0,
                retry_after: Some(self.window),
            },
            Err(e) => {
                warn!(identity = %identity, error = %e, "Admission store failed, admitting request");
                AdmissionDecision {
                    admitted: true,
                    limit: self.limit,
                    remaining: self.limit,
                    retry_after: None,
                }
            }
        }
    }
}

/// Window key for a transport-level peer address.
pub fn client_key(peer: IpAddr) -> String {
    format!("rl:{peer}")
}

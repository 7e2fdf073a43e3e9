//! Runtime proxy pool (§4.3): a concurrency-safe in-process registry loaded
//! from the published proxy file, handing out uniformly random selections
//! and auto-pruning proxies that fail too many times in a row.
//!
//! Grounded on the teacher's `job_scheduling::JobQueue` concurrency shape
//! (`Arc<RwLock<...>>` guarding a small set of collections, read/write split
//! by lock) — the closest in-tree analogue to a shared mutable registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::IteratorRandom;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{ProxyPoolError, ProxyPoolResult};
use crate::metrics::Metrics;

use super::types::{Proxy, ProxyId};

/// `{failures, last_used}` keyed by proxy identity (§3).
#[derive(Debug, Clone)]
pub struct ProxyScore {
    pub failures: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl Default for ProxyScore {
    fn default() -> Self {
        Self { failures: 0, last_used: None }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    proxies: HashMap<ProxyId, Proxy>,
    scores: HashMap<ProxyId, ProxyScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub failing: usize,
}

/// Single process-wide instance per worker (§4.3: "there is no cross-worker
/// sharing of failure counts — that is an explicit design choice").
#[derive(Debug)]
pub struct ProxyPool {
    state: RwLock<PoolState>,
    published_path: PathBuf,
    max_consecutive_failures: u32,
    metrics: Arc<Metrics>,
}

impl ProxyPool {
    pub fn new(published_path: PathBuf, max_consecutive_failures: u32, metrics: Arc<Metrics>) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            published_path,
            max_consecutive_failures,
            metrics,
        }
    }

    /// Loads (or reloads) the pool from the published JSON file. New entries
    /// start with `failures = 0`; proxies no longer present lose their score
    /// (§4.3 `reload()`).
    pub async fn reload(&self) -> ProxyPoolResult<usize> {
        let bytes = match tokio::fs::read(&self.published_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.published_path.display(), "no published proxy file yet");
                Vec::new()
            }
            Err(err) => {
                return Err(ProxyPoolError::LoadFailed {
                    path: self.published_path.display().to_string(),
                    message: err.to_string(),
                });
            }
        };

        let proxies: Vec<Proxy> = if bytes.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(&bytes).map_err(|err| ProxyPoolError::LoadFailed {
                path: self.published_path.display().to_string(),
                message: err.to_string(),
            })?
        };

        let mut state = self.state.write().await;
        let mut fresh = HashMap::with_capacity(proxies.len());
        for proxy in proxies {
            fresh.insert(proxy.id(), proxy);
        }
        state.scores.retain(|id, _| fresh.contains_key(id));
        let count = fresh.len();
        state.proxies = fresh;
        info!(count, "proxy pool reloaded");
        Ok(count)
    }

    /// Uniformly random selection among currently-present entries (§4.3,
    /// §9: "the current contract is uniform random + counter-based
    /// pruning"). Fails if the pool is empty.
    pub async fn select(&self) -> ProxyPoolResult<Proxy> {
        let state = self.state.read().await;
        let mut rng = rand::rng();
        state
            .proxies
            .values()
            .choose(&mut rng)
            .cloned()
            .ok_or(ProxyPoolError::Empty)
    }

    /// Updates the failure counter for `proxy`: success resets to zero;
    /// failure increments and, once it reaches
    /// `max_consecutive_failures`, removes the proxy (§4.3, §8 auto-prune).
    pub async fn record(&self, proxy: &Proxy, success: bool) {
        let id = proxy.id();
        let mut state = self.state.write().await;
        let score = state.scores.entry(id.clone()).or_default();
        score.last_used = Some(Utc::now());

        if success {
            score.failures = 0;
            return;
        }

        score.failures += 1;
        if score.failures >= self.max_consecutive_failures {
            state.proxies.remove(&id);
            state.scores.remove(&id);
            self.metrics.incr_proxies_pruned();
            warn!(proxy = %id, "proxy pruned after consecutive failures");
        }
    }

    /// Manual removal (§4.3): the caller already knows the proxy is dead.
    pub async fn remove(&self, id: &ProxyId) {
        let mut state = self.state.write().await;
        if state.proxies.remove(id).is_some() {
            state.scores.remove(id);
            self.metrics.incr_proxies_pruned();
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.read().await;
        let failing = state.scores.values().filter(|s| s.failures > 0).count();
        PoolStats { total: state.proxies.len(), failing }
    }

    pub async fn failures_for(&self, id: &ProxyId) -> u32 {
        self.state.read().await.scores.get(id).map(|s| s.failures).unwrap_or(0)
    }
}

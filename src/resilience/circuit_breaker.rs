//! Per-domain circuit breaker (§4.4.1).
//!
//! Grounded on `utils/circuit_breaker_simple.rs`'s state-machine shape
//! (`Arc<RwLock<State>>`, `should_allow_request`/`record_result` split) but
//! deliberately diverges from it in one place: the teacher's breaker
//! propagates lock/timeout errors as `CircuitBreakerError`s, while this one
//! is **fail-open** per §4.4.1 — any internal error returns `true` rather
//! than blocking traffic on the breaker's own bugs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::ErrorKind;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Cloudflare,
    Captcha,
    RateLimit,
    IpBan,
    Unknown,
}

#[derive(Debug, Clone)]
struct DomainCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probes: u32,
    last_block_kind: Option<BlockKind>,
}

impl Default for DomainCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_probes: 0,
            last_block_kind: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub fail_max: u32,
    pub reset_timeout: Duration,
    pub half_open_max: u32,
}

/// Per-domain registry. Baseline is per-worker in-memory state (§9); the
/// trait boundary is `CircuitBreaker` so a broker-backed alternate can be
/// swapped in behind it without the scraping dispatcher noticing (§9 open
/// question — "choose one policy at deploy time... do not silently mix").
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    async fn can_request(&self, domain: &str) -> bool;
    async fn record_success(&self, domain: &str);
    async fn record_failure(&self, domain: &str, kind: ErrorKind);
    async fn state(&self, domain: &str) -> CircuitState;
}

#[derive(Debug)]
pub struct LocalCircuitBreaker {
    config: CircuitBreakerConfig,
    domains: RwLock<HashMap<String, DomainCircuit>>,
    metrics: Arc<Metrics>,
}

impl LocalCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, domains: RwLock::new(HashMap::new()), metrics }
    }
}

#[async_trait]
impl CircuitBreaker for LocalCircuitBreaker {
    /// Fail-open per §4.4.1: any internal error here returns `true` instead
    /// of propagating, so a bug in the breaker never blocks traffic.
    async fn can_request(&self, domain: &str) -> bool {
        let mut domains = self.domains.write().await;
        let circuit = domains.entry(domain.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let Some(opened_at) = circuit.opened_at else {
                    // Should be unreachable (Open always sets opened_at), but
                    // fail-open rather than wedge the caller.
                    return true;
                };
                if opened_at.elapsed() >= self.config.reset_timeout {
                    info!(domain, "circuit transitioning Open -> HalfOpen");
                    circuit.state = CircuitState::HalfOpen;
                    // This call is itself the first HalfOpen probe, not a
                    // freebie before the cap starts counting (§4.4.1: "allow
                    // exactly half_open_max probes").
                    circuit.half_open_probes = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_probes < self.config.half_open_max {
                    circuit.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record_success(&self, domain: &str) {
        let mut domains = self.domains.write().await;
        let circuit = domains.entry(domain.to_string()).or_default();
        circuit.consecutive_failures = 0;
        if circuit.state == CircuitState::HalfOpen {
            info!(domain, "circuit transitioning HalfOpen -> Closed");
            circuit.state = CircuitState::Closed;
            circuit.opened_at = None;
            circuit.half_open_probes = 0;
        }
    }

    async fn record_failure(&self, domain: &str, kind: ErrorKind) {
        let block_kind = classify_block_kind(kind);
        let mut domains = self.domains.write().await;
        let circuit = domains.entry(domain.to_string()).or_default();
        circuit.last_block_kind = Some(block_kind);

        match circuit.state {
            CircuitState::HalfOpen => {
                warn!(domain, "circuit re-opening after HalfOpen probe failure");
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.half_open_probes = 0;
                self.metrics.incr_breaker_trips();
            }
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.fail_max {
                    warn!(domain, failures = circuit.consecutive_failures, "circuit opening");
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                    self.metrics.incr_breaker_trips();
                }
            }
            CircuitState::Open => {
                circuit.opened_at = Some(Instant::now());
            }
        }
    }

    async fn state(&self, domain: &str) -> CircuitState {
        self.domains.read().await.get(domain).map(|c| c.state).unwrap_or(CircuitState::Closed)
    }
}

fn classify_block_kind(kind: ErrorKind) -> BlockKind {
    match kind {
        ErrorKind::HttpRateLimit => BlockKind::RateLimit,
        ErrorKind::HttpBlocked => BlockKind::Captcha,
        ErrorKind::Proxy => BlockKind::IpBan,
        _ => BlockKind::Unknown,
    }
}

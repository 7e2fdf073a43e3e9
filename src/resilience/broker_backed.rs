//! Broker-backed resilience state (§9 open question: cross-worker
//! consistency). The baseline policy keeps circuit breakers and rate
//! limiters in per-worker memory (see [`super::circuit_breaker::LocalCircuitBreaker`]
//! and [`super::rate_limiter::LocalRateLimiter`]); when `W * r` would exceed
//! the target politeness for a domain, an operator can opt into these
//! broker-backed variants instead via `[resilience] cross_worker = true`.
//!
//! The two are never mixed within one deployment (§9): the orchestrator
//! picks one `CircuitBreaker`/`RateLimiter` trait object at startup and
//! hands it to every worker.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::broker::{Broker, BrokerExt};
use crate::errors::ErrorKind;
use crate::metrics::Metrics;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SharedCircuitState {
    state: StoredState,
    consecutive_failures: u32,
    opened_at_unix_ms: Option<i64>,
    half_open_probes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum StoredState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for SharedCircuitState {
    fn default() -> Self {
        Self { state: StoredState::Closed, consecutive_failures: 0, opened_at_unix_ms: None, half_open_probes: 0 }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stores breaker state under `circuit:{domain}` in the broker (§9). This
/// reference implementation accepts a benign race on the read-modify-write
/// around state transitions (two workers flipping CLOSED->OPEN at once
/// briefly double-counts the failure that trips it) in exchange for not
/// requiring a broker-side scripting facility; it is documented here rather
/// than silently assumed.
pub struct BrokerBackedCircuitBreaker<B: Broker> {
    broker: Arc<B>,
    config: CircuitBreakerConfig,
    metrics: Arc<Metrics>,
}

impl<B: Broker> BrokerBackedCircuitBreaker<B> {
    pub fn new(broker: Arc<B>, config: CircuitBreakerConfig, metrics: Arc<Metrics>) -> Self {
        Self { broker, config, metrics }
    }

    fn key(domain: &str) -> String {
        format!("circuit:{domain}")
    }

    async fn load(&self, domain: &str) -> SharedCircuitState {
        self.broker.get_json(&Self::key(domain)).await.ok().flatten().unwrap_or_default()
    }

    async fn store(&self, domain: &str, state: &SharedCircuitState) {
        let _ = self.broker.set_json(&Self::key(domain), state, Duration::from_secs(3600)).await;
    }
}

#[async_trait]
impl<B: Broker> CircuitBreaker for BrokerBackedCircuitBreaker<B> {
    async fn can_request(&self, domain: &str) -> bool {
        let mut state = self.load(domain).await;
        let allow = match state.state {
            StoredState::Closed => true,
            StoredState::Open => {
                let Some(opened_at) = state.opened_at_unix_ms else { return true };
                let elapsed_ms = now_ms() - opened_at;
                if elapsed_ms >= self.config.reset_timeout.as_millis() as i64 {
                    info!(domain, "circuit (broker-backed) transitioning Open -> HalfOpen");
                    state.state = StoredState::HalfOpen;
                    state.half_open_probes = 0;
                    self.store(domain, &state).await;
                    true
                } else {
                    false
                }
            }
            StoredState::HalfOpen => {
                if state.half_open_probes < self.config.half_open_max {
                    state.half_open_probes += 1;
                    self.store(domain, &state).await;
                    true
                } else {
                    false
                }
            }
        };
        allow
    }

    async fn record_success(&self, domain: &str) {
        let mut state = self.load(domain).await;
        state.consecutive_failures = 0;
        if state.state == StoredState::HalfOpen {
            state.state = StoredState::Closed;
            state.opened_at_unix_ms = None;
            state.half_open_probes = 0;
        }
        self.store(domain, &state).await;
    }

    async fn record_failure(&self, domain: &str, _kind: ErrorKind) {
        let mut state = self.load(domain).await;
        match state.state {
            StoredState::HalfOpen => {
                warn!(domain, "circuit (broker-backed) re-opening after HalfOpen failure");
                state.state = StoredState::Open;
                state.opened_at_unix_ms = Some(now_ms());
                state.half_open_probes = 0;
                self.metrics.incr_breaker_trips();
            }
            StoredState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.fail_max {
                    state.state = StoredState::Open;
                    state.opened_at_unix_ms = Some(now_ms());
                    self.metrics.incr_breaker_trips();
                }
            }
            StoredState::Open => {
                state.opened_at_unix_ms = Some(now_ms());
            }
        }
        self.store(domain, &state).await;
    }

    async fn state(&self, domain: &str) -> CircuitState {
        match self.load(domain).await.state {
            StoredState::Closed => CircuitState::Closed,
            StoredState::Open => CircuitState::Open,
            StoredState::HalfOpen => CircuitState::HalfOpen,
        }
    }
}

/// Stores rate-limiter state as an INCR-with-expiry window under
/// `ratelimit:{domain}:{window}` rather than a floating-point token bucket,
/// since `Broker::incr` is the only atomic primitive guaranteed cross-worker
/// (§9: "an atomic INCR-with-expiry token-bucket script"). Each 60s window
/// allows up to `rate_per_minute` acquisitions.
pub struct BrokerBackedRateLimiter<B: Broker> {
    broker: Arc<B>,
    default_rate_per_minute: u32,
    overrides: std::collections::HashMap<String, u32>,
    metrics: Arc<Metrics>,
}

impl<B: Broker> BrokerBackedRateLimiter<B> {
    pub fn new(
        broker: Arc<B>,
        default_rate_per_minute: u32,
        overrides: std::collections::HashMap<String, u32>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { broker, default_rate_per_minute, overrides, metrics }
    }

    fn rate_for(&self, domain: &str) -> u32 {
        self.overrides.get(domain).copied().unwrap_or(self.default_rate_per_minute)
    }

    fn window_key(domain: &str) -> String {
        let window = chrono::Utc::now().timestamp() / 60;
        format!("ratelimit:{domain}:{window}")
    }
}

#[async_trait]
impl<B: Broker> RateLimiter for BrokerBackedRateLimiter<B> {
    async fn acquire(&self, domain: &str, blocking: bool) -> bool {
        let rate = self.rate_for(domain);
        if rate == 0 {
            if !blocking {
                return false;
            }
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        loop {
            let key = Self::window_key(domain);
            let count = self.broker.incr(&key, Duration::from_secs(120)).await.unwrap_or(i64::MAX);
            if count <= rate as i64 {
                return true;
            }
            if !blocking {
                return false;
            }
            self.metrics.incr_rate_limit_waits();
            // Window resets on the minute boundary; sleep until then.
            let now = chrono::Utc::now();
            let seconds_into_minute = now.timestamp() % 60;
            let wait = Duration::from_secs((60 - seconds_into_minute) as u64);
            tokio::time::sleep(wait).await;
        }
    }
}

//! In-process metrics counters (§10.3).
//!
//! Full OpenTelemetry/OTLP export is out of scope for this crate (see
//! DESIGN.md) — there is no collector described anywhere in the spec. What
//! §8's invariants actually need is a handful of atomic counters that can be
//! asserted on in tests and logged periodically for an operator tailing
//! stdout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// Process-wide counters, shared via `Arc` with every component that needs
/// to bump one. Cheap to clone (it's just an `Arc` to a struct of atomics).
#[derive(Debug, Default)]
pub struct Metrics {
    pub chunks_completed: AtomicU64,
    pub proxies_pruned: AtomicU64,
    pub proxies_published: AtomicU64,
    pub breaker_trips: AtomicU64,
    pub rate_limit_waits: AtomicU64,
    pub fetch_retries: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub records_upserted: AtomicU64,
    pub price_discrepancies: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr_chunks_completed(&self) {
        self.chunks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_proxies_pruned(&self) {
        self.proxies_pruned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_proxies_published(&self, n: u64) {
        self.proxies_published.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_breaker_trips(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_rate_limit_waits(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_fetch_retries(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_upserted(&self, n: u64) {
        self.records_upserted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_price_discrepancies(&self) {
        self.price_discrepancies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            proxies_pruned: self.proxies_pruned.load(Ordering::Relaxed),
            proxies_published: self.proxies_published.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            records_upserted: self.records_upserted.load(Ordering::Relaxed),
            price_discrepancies: self.price_discrepancies.load(Ordering::Relaxed),
        }
    }

    /// Spawns a background task that logs a snapshot every `interval` until
    /// the returned handle is dropped or aborted.
    pub fn spawn_periodic_logger(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = metrics.snapshot();
                info!(?snapshot, "metrics snapshot");
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chunks_completed: u64,
    pub proxies_pruned: u64,
    pub proxies_published: u64,
    pub breaker_trips: u64,
    pub rate_limit_waits: u64,
    pub fetch_retries: u64,
    pub fetch_failures: u64,
    pub records_upserted: u64,
    pub price_discrepancies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());

        metrics.incr_chunks_completed();
        metrics.incr_proxies_pruned();
        metrics.incr_proxies_pruned();

        let snap = metrics.snapshot();
        assert_eq!(snap.chunks_completed, 1);
        assert_eq!(snap.proxies_pruned, 2);
    }
}

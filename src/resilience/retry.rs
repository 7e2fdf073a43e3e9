//! Retry with exponential backoff + jitter (§4.4.3).
//!
//! Grounded on `utils/database_retry.rs`'s `with_retry` shape (closure
//! re-invoked until success or budget exhaustion, delay computed by a
//! helper, non-retryable errors short-circuit) and `utils/jitter.rs`'s
//! jitter-generation style, but rebuilt on `rand` instead of `fastrand`
//! (the teacher's `fastrand` use was never a declared dependency of its own
//! `Cargo.toml` — see DESIGN.md) and over the typed `ErrorKind` classifier
//! from §4.4.4 rather than sqlx-specific error matching.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::errors::ErrorKind;
use crate::metrics::Metrics;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.5,
        }
    }
}

/// Delay before attempt `k` (1-indexed, `k` in `[1, max_attempts - 1]`) per
/// §4.4.3: `d = min(base * 2^(k-1), max_delay); d += uniform(0, d * jitter)`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay.as_secs_f64();
    let exponential = base * 2f64.powi((attempt.saturating_sub(1)) as i32);
    let capped = exponential.min(config.max_delay.as_secs_f64());
    let jitter_span = capped * config.jitter_factor;
    let jitter = if jitter_span > 0.0 { rand::rng().random_range(0.0..=jitter_span) } else { 0.0 };
    Duration::from_secs_f64(capped + jitter)
}

/// Outcome of one attempt, fed back into the retry loop so it can decide
/// whether to retry, and with what delay override.
pub enum AttemptOutcome<T> {
    Success(T),
    /// Failed with a classified kind; `retry_after` overrides the computed
    /// backoff delay when the response carried a `Retry-After` header
    /// (§4.4.3).
    Failed { kind: ErrorKind, retry_after: Option<Duration> },
}

/// Retries `operation` per the policy in `config`. Non-retryable kinds
/// (`NOT_FOUND`, `PARSE`) abort immediately without consuming the whole
/// attempt budget's delay. Returns the last error kind on exhaustion.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    metrics: &Arc<Metrics>,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ErrorKind>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let mut last_kind = ErrorKind::Unknown;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            AttemptOutcome::Success(value) => {
                if attempt > 1 {
                    debug!(operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            AttemptOutcome::Failed { kind, retry_after } => {
                last_kind = kind;
                if !kind.is_retryable() {
                    debug!(operation_name, ?kind, "non-retryable failure, aborting");
                    return Err(kind);
                }
                if attempt < config.max_attempts {
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(config, attempt));
                    warn!(operation_name, attempt, ?kind, delay_ms = delay.as_millis() as u64, "retrying after failure");
                    metrics.incr_fetch_retries();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    metrics.incr_fetch_failures();
    warn!(operation_name, attempts = config.max_attempts, ?last_kind, "retry budget exhausted");
    Err(last_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = RetryConfig { max_attempts: 5, base_delay: Duration::from_secs(2), max_delay: Duration::from_secs(10), jitter_factor: 0.0 };
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(10), "capped at max_delay");
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig { max_attempts: 5, base_delay: Duration::from_secs(2), max_delay: Duration::from_secs(60), jitter_factor: 0.5 };
        for attempt in 1..5 {
            let base = 2f64 * 2f64.powi(attempt - 1);
            let delay = backoff_delay(&config, attempt as u32);
            assert!(delay.as_secs_f64() >= base);
            assert!(delay.as_secs_f64() <= base * 1.5 + 0.001);
        }
    }

    #[tokio::test]
    async fn non_retryable_kind_aborts_immediately() {
        let config = RetryConfig { max_attempts: 5, ..Default::default() };
        let calls = AtomicU32::new(0);
        let result: Result<(), ErrorKind> = retry_with_backoff(&config, &Metrics::new(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::Failed { kind: ErrorKind::NotFound, retry_after: None } }
        })
        .await;
        assert_eq!(result, Err(ErrorKind::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = RetryConfig { max_attempts: 5, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5), jitter_factor: 0.0 };
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&config, &Metrics::new(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    AttemptOutcome::Failed { kind: ErrorKind::NetworkTimeout, retry_after: None }
                } else {
                    AttemptOutcome::Success(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    proptest::proptest! {
        #[test]
        fn jitter_never_undershoots_or_blows_past_one_and_a_half_x(
            attempt in 1u32..8,
            base_secs in 1u64..10,
            max_secs in 10u64..120,
        ) {
            let config = RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_secs(base_secs),
                max_delay: Duration::from_secs(max_secs),
                jitter_factor: 0.5,
            };
            let capped = (base_secs as f64 * 2f64.powi((attempt - 1) as i32)).min(max_secs as f64);
            let delay = backoff_delay(&config, attempt).as_secs_f64();
            prop_assert!(delay >= capped - 1e-9);
            prop_assert!(delay <= capped * 1.5 + 1e-9);
        }
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_kind() {
        let config = RetryConfig { max_attempts: 3, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), jitter_factor: 0.0 };
        let result: Result<(), ErrorKind> = retry_with_backoff(&config, &Metrics::new(), "op", || async {
            AttemptOutcome::Failed { kind: ErrorKind::HttpServerError, retry_after: None }
        })
        .await;
        assert_eq!(result, Err(ErrorKind::HttpServerError));
    }
}

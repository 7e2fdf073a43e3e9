//! Resilience primitives (§4.4): per-domain circuit breaker, token-bucket
//! rate limiter, retry-with-backoff, error classification, soft-block
//! detection, and checkpointing.

pub mod broker_backed;
pub mod checkpoint;
pub mod circuit_breaker;
pub mod classify;
pub mod rate_limiter;
pub mod retry;
pub mod soft_block;

pub use checkpoint::{Checkpoint, CheckpointData};
pub use circuit_breaker::{BlockKind, CircuitBreaker, CircuitBreakerConfig, CircuitState, LocalCircuitBreaker};
pub use classify::{classify, FailureSignal};
pub use rate_limiter::{LocalRateLimiter, RateLimiter};
pub use retry::{backoff_delay, retry_with_backoff, AttemptOutcome, RetryConfig};
pub use broker_backed::{BrokerBackedCircuitBreaker, BrokerBackedRateLimiter};

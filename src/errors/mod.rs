//! Centralized error handling for the orchestrator core.
//!
//! # Error categories
//!
//! - **ConfigError**: config file / env loading failures.
//! - **BrokerError**: key-value/pub-sub broker failures.
//! - **RuntimeError**: task runtime (chain/group/chord) scheduling failures.
//! - **ProxyPoolError**: runtime proxy pool failures (empty pool, reload).
//! - **ResilienceError**: circuit breaker / rate limiter / checkpoint failures.
//! - **SinkError**: record sink (SQLite) failures.
//! - **CoreError**: top-level error aggregating all of the above, used by the
//!   orchestrator and the CLI to compute an exit code (§6).
//!
//! `ErrorKind` (§4.4.4) is a separate, `Copy` classification value threaded
//! through retry/circuit-breaker logic — it is not itself a propagated error.

pub mod types;

pub use types::*;

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type BrokerResult<T> = Result<T, BrokerError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
pub type ProxyPoolResult<T> = Result<T, ProxyPoolError>;
pub type ResilienceResult<T> = Result<T, ResilienceError>;
pub type SinkResult<T> = Result<T, SinkError>;
pub type RefreshResult<T> = Result<T, RefreshError>;
pub type ScrapingResult<T> = Result<T, ScrapingError>;
pub type CoreResult<T> = Result<T, CoreError>;

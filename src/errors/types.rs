//! Error type definitions for the orchestrator core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker unreachable: {message}")]
    Unreachable { message: String },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("worker runtime unreachable")]
    Unreachable,

    #[error("task exceeded soft time limit: {task}")]
    SoftLimitExceeded { task: String },

    #[error("task exceeded hard time limit and was killed: {task}")]
    HardLimitExceeded { task: String },

    #[error("task panicked: {task} - {message}")]
    TaskPanicked { task: String, message: String },
}

#[derive(Error, Debug)]
pub enum ProxyPoolError {
    #[error("proxy pool is empty")]
    Empty,

    #[error("failed to load published proxy file {path}: {message}")]
    LoadFailed { path: String, message: String },

    #[error("failed to publish proxy file {path}: {message}")]
    PublishFailed { path: String, message: String },
}

#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("circuit open for domain {domain}")]
    CircuitOpen { domain: String },

    #[error("checkpoint io failure for session {session}: {message}")]
    CheckpointIo { session: String, message: String },

    #[error("rate limiter misconfigured for domain {domain}: rate_per_minute=0 with blocking=false")]
    RateLimiterWouldBlockForever { domain: String },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("busy-retry budget ({attempts}) exhausted for {operation}")]
    RetryBudgetExhausted { operation: String, attempts: u32 },

    #[error("constraint violation: {constraint} - {message}")]
    ConstraintViolation { constraint: String, message: String },
}

/// Errors surfaced by the proxy refresh pipeline (§4.2). Per-proxy failures
/// inside `CheckChunk` are never propagated as errors (§4.2.3: "failures are
/// just drops") — only whole-stage failures land here.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("candidate scrape failed: {message}")]
    ScrapeFailed { message: String },

    #[error("candidate source returned malformed data: {message}")]
    MalformedCandidates { message: String },

    #[error("aggregate step failed: {message}")]
    AggregateFailed { message: String },
}

/// Errors surfaced by the site-scraping dispatcher (§4.5). Per-URL failures
/// inside `ScrapeChunk` are never propagated as errors (§7: "chunk-level
/// exception: logged, chunk result is `[]`, aggregator proceeds") — only
/// whole-stage failures land here.
#[derive(Error, Debug)]
pub enum ScrapingError {
    #[error("unknown site: {site}")]
    UnknownSite { site: String },

    #[error("pagination walk failed for {site}: {message}")]
    PaginationFailed { site: String, message: String },

    #[error("aggregate step failed: {message}")]
    AggregateFailed { message: String },
}

/// Error surfaced by a `Fetcher` (§6). Deliberately thin: the Fetcher
/// contract "never itself retries", so this only needs to carry enough for
/// the caller's `classify()` step (§4.4.4) to pick a recovery action.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("http status {status}")]
    Status { status: u16 },

    #[error("transport error: {message}")]
    Transport { message: String },

    /// A connection failure that occurred while routed through a proxy,
    /// distinct from `Connection` (direct connectivity) so callers can
    /// classify it as `ErrorKind::Proxy` and rotate proxies instead of
    /// just backing off (§4.4.4, §7).
    #[error("proxy error: {message}")]
    Proxy { message: String },
}

/// Top-level error surfaced to the orchestrator and CLI. Maps to the exit
/// codes in §6: 2 = Config, 3 = Broker/Runtime, 4 handled separately by
/// `ensure_proxies` timing out (not an error variant), 5 = all jobs failed.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("proxy pool error: {0}")]
    ProxyPool(#[from] ProxyPoolError),

    #[error("resilience error: {0}")]
    Resilience(#[from] ResilienceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("refresh pipeline error: {0}")]
    Refresh(#[from] RefreshError),

    #[error("scraping pipeline error: {0}")]
    Scraping(#[from] ScrapingError),

    #[error("insufficient proxies after timeout: have {have}, need {need}")]
    InsufficientProxies { have: usize, need: usize },

    #[error("all jobs failed")]
    AllJobsFailed,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Process exit code per §6: 0 success, 2 config error, 3 infrastructure
    /// unavailable, 4 insufficient proxies, 5 all jobs failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Broker(_) | Self::Runtime(_) => 3,
            Self::InsufficientProxies { .. } => 4,
            Self::AllJobsFailed => 5,
            _ => 1,
        }
    }
}

/// The eleven-kind error classification used by the retry and circuit
/// breaker logic (§4.4.4). Deliberately independent of the `thiserror`
/// hierarchy above: it is a pure value, not a propagated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkTimeout,
    NetworkConnection,
    HttpClientError,
    HttpServerError,
    HttpRateLimit,
    HttpBlocked,
    NotFound,
    Parse,
    Proxy,
    ServiceUnavailable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    RetryImmediate,
    RetryWithBackoff,
    RetryWithProxyRotation,
    EscalateStrategy,
    Skip,
    CircuitBreak,
}

impl ErrorKind {
    /// Static recovery-action table per §4.4.4.
    pub fn recovery_action(self) -> RecoveryAction {
        match self {
            ErrorKind::NetworkTimeout => RecoveryAction::RetryWithBackoff,
            ErrorKind::NetworkConnection => RecoveryAction::RetryWithBackoff,
            ErrorKind::HttpClientError => RecoveryAction::Skip,
            ErrorKind::HttpServerError => RecoveryAction::RetryWithBackoff,
            ErrorKind::HttpRateLimit => RecoveryAction::CircuitBreak,
            ErrorKind::HttpBlocked => RecoveryAction::CircuitBreak,
            ErrorKind::NotFound => RecoveryAction::Skip,
            ErrorKind::Parse => RecoveryAction::Skip,
            ErrorKind::Proxy => RecoveryAction::RetryWithProxyRotation,
            ErrorKind::ServiceUnavailable => RecoveryAction::EscalateStrategy,
            ErrorKind::Unknown => RecoveryAction::RetryImmediate,
        }
    }

    /// Non-retryable kinds per §4.4.3: NOT_FOUND and PARSE abort immediately.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::NotFound | ErrorKind::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(CoreError::Config(ConfigError::Invalid { message: String::new() }).exit_code(), 2);
        assert_eq!(CoreError::AllJobsFailed.exit_code(), 5);
        assert_eq!(
            CoreError::InsufficientProxies { have: 1, need: 20 }.exit_code(),
            4
        );
    }

    #[test]
    fn not_found_and_parse_are_terminal() {
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Parse.is_retryable());
        assert!(ErrorKind::NetworkTimeout.is_retryable());
    }

    #[test]
    fn rate_limit_and_blocked_circuit_break() {
        assert_eq!(ErrorKind::HttpRateLimit.recovery_action(), RecoveryAction::CircuitBreak);
        assert_eq!(ErrorKind::HttpBlocked.recovery_action(), RecoveryAction::CircuitBreak);
    }
}

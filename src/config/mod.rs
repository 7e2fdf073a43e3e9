//! Layered configuration for the orchestrator core.
//!
//! Loaded with `figment` from a TOML file with environment variable overrides
//! (prefix `SSC_`, nested keys joined with `__`, e.g. `SSC_RESILIENCE__RATE_PER_MINUTE`).
//! Every section has field defaults so an empty or partial config file still
//! produces a spec-compliant runtime.

pub mod defaults;
pub mod duration_serde;

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub runtime: RuntimeConfig,
    pub proxy_pool: ProxyPoolConfig,
    pub resilience: ResilienceConfig,
    pub checkpoint: CheckpointConfig,
    pub sink: SinkConfig,
    pub scraping: ScrapingConfig,
    pub orchestrator: OrchestratorConfig,
    pub sites: Vec<SiteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            runtime: RuntimeConfig::default(),
            proxy_pool: ProxyPoolConfig::default(),
            resilience: ResilienceConfig::default(),
            checkpoint: CheckpointConfig::default(),
            sink: SinkConfig::default(),
            scraping: ScrapingConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            sites: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` layered under environment overrides.
    ///
    /// A missing file is not an error: defaults plus env overrides are used.
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            Config::default(),
        ));
        if path.exists() {
            figment = figment.merge(Toml::file(&path));
        }
        figment = figment.merge(Env::prefixed("SSC_").split("__"));
        figment
            .extract()
            .map_err(|e| ConfigError::Invalid { message: e.to_string() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// "in-memory" or "redis" (a real Redis client is an external collaborator; see §2).
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub key_ttl_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: defaults::DEFAULT_BROKER_KIND.to_string(),
            host: defaults::DEFAULT_BROKER_HOST.to_string(),
            port: defaults::DEFAULT_BROKER_PORT,
            key_ttl_seconds: defaults::DEFAULT_BROKER_KEY_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_concurrency: usize,
    pub within_worker_semaphore: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: defaults::DEFAULT_WORKER_CONCURRENCY,
            within_worker_semaphore: defaults::DEFAULT_WITHIN_WORKER_SEMAPHORE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    pub min_proxies_for_scraping: usize,
    pub max_consecutive_failures: u32,
    pub refresh_chunk_size: usize,
    #[serde(with = "duration_serde::duration")]
    pub refresh_timeout: Duration,
    #[serde(with = "duration_serde::duration")]
    pub check_chunk_soft_limit: Duration,
    #[serde(with = "duration_serde::duration")]
    pub check_chunk_hard_limit: Duration,
    pub published_dir: PathBuf,
    pub published_json_filename: String,
    pub published_text_filename: String,
    /// Anonymity-judge URLs, tried in fixed fallback order (§4.2.3 step 2).
    pub judge_urls: Vec<String>,
    /// IP-echo services for the post-classification quality probe (§4.2.3 step 4).
    pub ip_echo_urls: Vec<String>,
    #[serde(with = "duration_serde::duration")]
    pub liveness_timeout: Duration,
    /// Source of raw proxy candidates for the `Scrape` stage (§4.2.1).
    pub candidate_source_url: String,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            min_proxies_for_scraping: defaults::DEFAULT_MIN_PROXIES_FOR_SCRAPING,
            max_consecutive_failures: defaults::DEFAULT_MAX_CONSECUTIVE_PROXY_FAILURES,
            refresh_chunk_size: defaults::DEFAULT_REFRESH_CHUNK_SIZE,
            refresh_timeout: Duration::from_secs(defaults::DEFAULT_REFRESH_TIMEOUT_SECONDS),
            check_chunk_soft_limit: Duration::from_secs(
                defaults::DEFAULT_CHECK_CHUNK_SOFT_LIMIT_SECONDS,
            ),
            check_chunk_hard_limit: Duration::from_secs(
                defaults::DEFAULT_CHECK_CHUNK_HARD_LIMIT_SECONDS,
            ),
            published_dir: PathBuf::from(defaults::DEFAULT_PROXY_POOL_DIR),
            published_json_filename: defaults::DEFAULT_PROXY_JSON_FILENAME.to_string(),
            published_text_filename: defaults::DEFAULT_PROXY_TEXT_FILENAME.to_string(),
            judge_urls: defaults::DEFAULT_JUDGE_URLS.iter().map(|s| s.to_string()).collect(),
            ip_echo_urls: defaults::DEFAULT_IP_ECHO_URLS.iter().map(|s| s.to_string()).collect(),
            liveness_timeout: Duration::from_secs(defaults::DEFAULT_LIVENESS_PROBE_TIMEOUT_SECONDS),
            candidate_source_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub fail_max: u32,
    #[serde(with = "duration_serde::duration")]
    pub reset_timeout: Duration,
    pub half_open_max: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: defaults::DEFAULT_CB_FAIL_MAX,
            reset_timeout: Duration::from_secs(defaults::DEFAULT_CB_RESET_TIMEOUT_SECONDS),
            half_open_max: defaults::DEFAULT_CB_HALF_OPEN_MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_seconds: defaults::DEFAULT_RETRY_BASE_DELAY_SECONDS,
            max_delay_seconds: defaults::DEFAULT_RETRY_MAX_DELAY_SECONDS,
            jitter_factor: defaults::DEFAULT_RETRY_JITTER_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub default_rate_per_minute: u32,
    /// Per-domain rate overrides, e.g. `{"imot.bg" = 30}`.
    pub rate_per_minute_overrides: std::collections::HashMap<String, u32>,
    pub soft_block_min_size_bytes: usize,
    /// Baseline is per-worker (false). Setting true promotes breaker/rate-limiter
    /// state to the broker; see SPEC_FULL.md §9 and DESIGN.md for the rationale.
    pub cross_worker: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            default_rate_per_minute: defaults::DEFAULT_RATE_PER_MINUTE,
            rate_per_minute_overrides: std::collections::HashMap::new(),
            soft_block_min_size_bytes: defaults::DEFAULT_SOFT_BLOCK_MIN_SIZE_BYTES,
            cross_worker: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    pub batch_size: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(defaults::DEFAULT_CHECKPOINT_DIR),
            batch_size: defaults::DEFAULT_CHECKPOINT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub database_url: String,
    pub busy_retry_attempts: u32,
    pub upsert_batch_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_url: defaults::DEFAULT_SINK_DATABASE_URL.to_string(),
            busy_retry_attempts: defaults::DEFAULT_SINK_BUSY_RETRY_ATTEMPTS,
            upsert_batch_size: defaults::DEFAULT_SINK_UPSERT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
    pub scrape_chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub chunk_size: usize,
    #[serde(with = "duration_serde::duration")]
    pub chunk_soft_limit: Duration,
    #[serde(with = "duration_serde::duration")]
    pub chunk_hard_limit: Duration,
    #[serde(with = "duration_serde::duration")]
    pub fetch_timeout: Duration,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::DEFAULT_SCRAPE_CHUNK_SIZE,
            chunk_soft_limit: Duration::from_secs(defaults::DEFAULT_SCRAPE_CHUNK_SOFT_LIMIT_SECONDS),
            chunk_hard_limit: Duration::from_secs(defaults::DEFAULT_SCRAPE_CHUNK_HARD_LIMIT_SECONDS),
            fetch_timeout: Duration::from_secs(defaults::DEFAULT_FETCH_TIMEOUT_SECONDS),
        }
    }
}

/// Lifecycle orchestrator settings (§4.1): health-check timeouts, the
/// orphaned-process cleanup patterns run at `start()`, and the optional
/// proxy-rotator TCP health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(with = "duration_serde::duration")]
    pub broker_ping_timeout: Duration,
    #[serde(with = "duration_serde::duration")]
    pub runtime_ping_timeout: Duration,
    /// `host:port` for the proxy-rotator process's listen port, if one is
    /// deployed. `None` skips that health check entirely.
    pub rotator_addr: Option<String>,
    #[serde(with = "duration_serde::duration")]
    pub rotator_ping_timeout: Duration,
    pub max_consecutive_health_failures: u32,
    /// Command-line substrings matched against running processes at
    /// `start()` to kill orphans left by a previous crash (§4.1).
    pub orphan_process_patterns: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            broker_ping_timeout: Duration::from_secs(2),
            runtime_ping_timeout: Duration::from_secs(5),
            rotator_addr: None,
            rotator_ping_timeout: Duration::from_secs(2),
            max_consecutive_health_failures: 3,
            orphan_process_patterns: Vec::new(),
        }
    }
}

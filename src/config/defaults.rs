//! Configuration default values.
//!
//! This module contains all the default values for configuration options,
//! making them easily changeable in one central location. Every numeric
//! default named in the design spec lives here so an empty config file
//! still produces a compliant runtime.

// Broker defaults
pub const DEFAULT_BROKER_KIND: &str = "in-memory";
pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
pub const DEFAULT_BROKER_PORT: u16 = 6379;
pub const DEFAULT_BROKER_KEY_TTL_SECONDS: u64 = 3600;

// Task runtime defaults
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;
pub const DEFAULT_WITHIN_WORKER_SEMAPHORE: usize = 5;

// Proxy pool / refresh defaults
pub const DEFAULT_MIN_PROXIES_FOR_SCRAPING: usize = 20;
pub const DEFAULT_MAX_CONSECUTIVE_PROXY_FAILURES: u32 = 3;
pub const DEFAULT_REFRESH_CHUNK_SIZE: usize = 100;
pub const DEFAULT_REFRESH_TIMEOUT_SECONDS: u64 = 50 * 60;
pub const DEFAULT_CHECK_CHUNK_SOFT_LIMIT_SECONDS: u64 = 13 * 60;
pub const DEFAULT_CHECK_CHUNK_HARD_LIMIT_SECONDS: u64 = 15 * 60;

// Scraping dispatcher defaults
pub const DEFAULT_SCRAPE_CHUNK_SIZE: usize = 25;
pub const DEFAULT_SCRAPE_CHUNK_SOFT_LIMIT_SECONDS: u64 = 10 * 60;
pub const DEFAULT_SCRAPE_CHUNK_HARD_LIMIT_SECONDS: u64 = 12 * 60;

// Resilience: circuit breaker
pub const DEFAULT_CB_FAIL_MAX: u32 = 5;
pub const DEFAULT_CB_RESET_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_CB_HALF_OPEN_MAX: u32 = 2;

// Resilience: rate limiter
pub const DEFAULT_RATE_PER_MINUTE: u32 = 20;

// Resilience: retry
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY_SECONDS: f64 = 2.0;
pub const DEFAULT_RETRY_MAX_DELAY_SECONDS: f64 = 60.0;
pub const DEFAULT_RETRY_JITTER_FACTOR: f64 = 0.5;

// Soft-block detector
pub const DEFAULT_SOFT_BLOCK_MIN_SIZE_BYTES: usize = 1000;

// Checkpoint
pub const DEFAULT_CHECKPOINT_DIR: &str = "./data/checkpoints";
pub const DEFAULT_CHECKPOINT_BATCH_SIZE: u32 = 10;

// Proxy pool published artifacts
pub const DEFAULT_PROXY_POOL_DIR: &str = "./data/proxies";
pub const DEFAULT_PROXY_JSON_FILENAME: &str = "proxies.json";
pub const DEFAULT_PROXY_TEXT_FILENAME: &str = "proxies.txt";

// Sink
pub const DEFAULT_SINK_DATABASE_URL: &str = "sqlite://./data/sale-sofia.db";
pub const DEFAULT_SINK_BUSY_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_SINK_UPSERT_BATCH_SIZE: usize = 200;

// Cross-source linkage
pub const DEFAULT_PRICE_DISCREPANCY_PCT: f64 = 5.0;

// HTTP fetcher
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 15;
pub const DEFAULT_LIVENESS_PROBE_TIMEOUT_SECONDS: u64 = 5;

// Refresh pipeline: anonymity judges and IP-echo quality probes, tried in order (§4.2.3).
pub const DEFAULT_JUDGE_URLS: &[&str] = &["http://httpbin.org/get", "http://azenv.net/"];
pub const DEFAULT_IP_ECHO_URLS: &[&str] = &["https://api.ipify.org", "http://ifconfig.me/ip"];

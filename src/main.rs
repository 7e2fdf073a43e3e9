//! CLI entry point (§6, §10.5): loads layered configuration, wires the
//! broker/runtime/fetcher/sink/proxy-pool/resilience stack behind the
//! orchestrator, and drives one scrape run per site named in a YAML sites
//! file, exiting with the code the orchestrator's failure (if any) maps to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sale_sofia_core::broker::{Broker, InMemoryBroker};
use sale_sofia_core::config::Config;
use sale_sofia_core::errors::CoreError;
use sale_sofia_core::extractor::SiteProfile;
use sale_sofia_core::fetcher::{Fetcher, StealthFetcher};
use sale_sofia_core::metrics::Metrics;
use sale_sofia_core::orchestrator::{run_scoped, Orchestrator};
use sale_sofia_core::proxy::ProxyPool;
use sale_sofia_core::refresh::RefreshPipeline;
use sale_sofia_core::resilience::{
    BrokerBackedCircuitBreaker, BrokerBackedRateLimiter, Checkpoint, CircuitBreaker, CircuitBreakerConfig,
    LocalCircuitBreaker, LocalRateLimiter, RateLimiter, RetryConfig,
};
use sale_sofia_core::runtime::InMemoryTaskRuntime;
use sale_sofia_core::scraping::dispatcher::SiteContext;
use sale_sofia_core::scraping::run_site_scrape;
use sale_sofia_core::sink::{Sink, SqliteSink};

/// One entry of the `--sites` YAML file (§6): the closed set of names
/// [`SiteProfile::by_name`] recognizes, paired with the base URL to crawl.
#[derive(Debug, Clone, Deserialize)]
struct SiteEntry {
    name: String,
    base_url: String,
}

#[derive(Debug, Parser)]
#[command(
    name = "sale-sofia-core",
    version,
    about = "Bulgarian real-estate listing scrape orchestrator"
)]
struct Cli {
    /// Layered TOML configuration file (figment: file, then `SSC_`-prefixed env overrides).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// YAML file listing the sites to scrape this run: `- {name: ..., base_url: ...}`.
    #[arg(long)]
    sites: PathBuf,

    /// Repeat for more verbose logging (-v info, -vv debug, -vvv trace); RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resilience_circuit_breaker_config(config: &sale_sofia_core::config::CircuitBreakerConfig) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        fail_max: config.fail_max,
        reset_timeout: config.reset_timeout,
        half_open_max: config.half_open_max,
    }
}

fn resilience_retry_config(config: &sale_sofia_core::config::RetryConfig) -> RetryConfig {
    RetryConfig {
        max_attempts: config.max_attempts,
        base_delay: Duration::from_secs_f64(config.base_delay_seconds.max(0.0)),
        max_delay: Duration::from_secs_f64(config.max_delay_seconds.max(0.0)),
        jitter_factor: config.jitter_factor,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32, CoreError> {
    let config = Config::load_from_file(&cli.config).map_err(CoreError::from)?;

    let sites_yaml = std::fs::read_to_string(&cli.sites)
        .map_err(|err| CoreError::internal(format!("failed to read sites file {}: {err}", cli.sites.display())))?;
    let site_entries: Vec<SiteEntry> =
        serde_yaml::from_str(&sites_yaml).map_err(|err| CoreError::internal(format!("failed to parse sites file: {err}")))?;
    if site_entries.is_empty() {
        return Err(CoreError::internal("sites file contains no sites"));
    }

    let metrics = Metrics::new();
    metrics.spawn_periodic_logger(Duration::from_secs(60));

    if config.broker.kind != "in-memory" {
        tracing::warn!(
            kind = %config.broker.kind,
            "only the in-memory broker is implemented in this build; falling back to it"
        );
    }
    let broker = Arc::new(InMemoryBroker::new());
    let broker_dyn: Arc<dyn Broker> = Arc::clone(&broker) as Arc<dyn Broker>;

    let runtime = Arc::new(InMemoryTaskRuntime::new());
    let fetcher: Arc<dyn Fetcher> = Arc::new(StealthFetcher::new());

    let proxy_pool = Arc::new(ProxyPool::new(
        config.proxy_pool.published_dir.join(&config.proxy_pool.published_json_filename),
        config.proxy_pool.max_consecutive_failures,
        Arc::clone(&metrics),
    ));

    let refresh_pipeline = Arc::new(RefreshPipeline::new(
        Arc::clone(&broker_dyn),
        Arc::clone(&runtime),
        Arc::clone(&fetcher),
        config.proxy_pool.clone(),
        config.runtime.within_worker_semaphore,
        Arc::clone(&metrics),
        None,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&broker_dyn),
        Arc::clone(&runtime),
        Arc::clone(&proxy_pool),
        Arc::clone(&refresh_pipeline),
        Arc::clone(&metrics),
        config.orchestrator.clone(),
        config.proxy_pool.clone(),
    ));

    let breaker_config = resilience_circuit_breaker_config(&config.resilience.circuit_breaker);
    let (breaker, rate_limiter): (Arc<dyn CircuitBreaker>, Arc<dyn RateLimiter>) = if config.resilience.cross_worker {
        (
            Arc::new(BrokerBackedCircuitBreaker::new(Arc::clone(&broker), breaker_config, Arc::clone(&metrics))),
            Arc::new(BrokerBackedRateLimiter::new(
                Arc::clone(&broker),
                config.resilience.default_rate_per_minute,
                config.resilience.rate_per_minute_overrides.clone(),
                Arc::clone(&metrics),
            )),
        )
    } else {
        (
            Arc::new(LocalCircuitBreaker::new(breaker_config, Arc::clone(&metrics))),
            Arc::new(LocalRateLimiter::new(
                config.resilience.default_rate_per_minute,
                config.resilience.rate_per_minute_overrides.clone(),
                Arc::clone(&metrics),
            )),
        )
    };
    let retry_config = resilience_retry_config(&config.resilience.retry);

    let sink: Arc<dyn Sink> = Arc::new(
        SqliteSink::connect(&config.sink.database_url, config.sink.busy_retry_attempts, Arc::clone(&metrics))
            .await
            .map_err(CoreError::from)?,
    );

    run_scoped(Arc::clone(&orchestrator), move |orchestrator| async move {
        tracing::info!(sites = site_entries.len(), "orchestrator ready, dispatching site scrapes");

        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for entry in &site_entries {
            let site_override = config.sites.iter().find(|s| s.name == entry.name);
            let mut scraping_config = config.scraping.clone();
            if let Some(chunk_size) = site_override.and_then(|s| s.scrape_chunk_size) {
                scraping_config.chunk_size = chunk_size;
            }

            let profile = match SiteProfile::by_name(&entry.name) {
                Some(profile) => profile,
                None => {
                    tracing::error!(site = %entry.name, "unknown site: no extractor/pagination profile registered");
                    failed += 1;
                    continue;
                }
            };

            let ctx = SiteContext {
                site: profile,
                fetcher: Arc::clone(&fetcher),
                pool: Arc::clone(orchestrator.proxy_pool()),
                breaker: Arc::clone(&breaker),
                rate_limiter: Arc::clone(&rate_limiter),
                retry_config: retry_config.clone(),
                fetch_timeout: scraping_config.fetch_timeout,
                soft_block_min_size_bytes: config.resilience.soft_block_min_size_bytes,
                metrics: Arc::clone(&metrics),
            };

            let job_id = Uuid::new_v4().to_string();
            let checkpoint = Arc::new(Checkpoint::new(config.checkpoint.dir.clone(), &entry.name, config.checkpoint.batch_size));
            let outcome = run_site_scrape(
                &runtime,
                Arc::clone(&sink),
                Arc::clone(&broker_dyn),
                Arc::clone(&metrics),
                ctx,
                &scraping_config,
                &entry.name,
                &entry.base_url,
                &job_id,
                Some(checkpoint),
            )
            .await;

            match outcome {
                Ok(job) => {
                    tracing::info!(
                        site = %entry.name,
                        job_id = %job.id,
                        records = job.records_extracted,
                        "site scrape complete"
                    );
                    succeeded += 1;
                }
                Err(err) => {
                    tracing::error!(site = %entry.name, error = %err, "site scrape failed");
                    failed += 1;
                }
            }
        }

        tracing::info!(succeeded, failed, total = site_entries.len(), "run complete");
        if succeeded == 0 {
            return Err(CoreError::AllJobsFailed);
        }
        Ok(0)
    })
    .await
}

//! Lifecycle orchestrator (§4.1): owns the broker, task runtime, and runtime
//! proxy pool handles, brings them up and tears them down in a single scoped
//! region, runs health checks, and exposes the progress/refresh/scrape entry
//! points the rest of the crate (and the CLI) drive everything through.
//!
//! New module — the teacher has no equivalent "own every external
//! dependency behind one handle" component (its `main.rs` wires services
//! directly into the web server). Grounded on `main.rs`'s
//! bind-then-signal-ready, background-task-spawn-after-ready startup shape
//! and [`crate::runtime::InMemoryTaskRuntime`]'s `CancellationToken`
//! discipline for the shutdown side; the three-stage progress wait it
//! delegates to is [`crate::refresh::wait_for_refresh`] (§4.2.5).

pub mod health;

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerExt};
use crate::config::{OrchestratorConfig, ProxyPoolConfig};
use crate::errors::{CoreError, CoreResult};
use crate::metrics::Metrics;
use crate::proxy::ProxyPool;
use crate::refresh::{wait_for_refresh, RefreshJob, RefreshPipeline};
use crate::runtime::InMemoryTaskRuntime;

pub use health::{HealthCheck, HealthReport};

/// Returned by [`Orchestrator::trigger_refresh`] (§4.1: "enqueues the
/// refresh chain, returns a `{job_id, chord_id}` handle"). The reference
/// runtime has no separate chord identifier distinct from the job itself —
/// `chord_id` mirrors `job_id` so the field survives for callers written
/// against the two-handle contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshHandle {
    pub job_id: String,
    pub chord_id: String,
}

/// Returned by [`Orchestrator::start_site_scrape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeHandle {
    pub job_id: String,
}

/// Lifecycle state a job can be in, independent of which pipeline produced
/// it (§4.1 `progress()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Unknown,
}

/// `{total, completed, status, pct}` snapshot (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub status: ProgressStatus,
    pub pct: f64,
}

impl ProgressSnapshot {
    fn from_counts(total: usize, completed: usize, status: ProgressStatus) -> Self {
        let pct = if total == 0 { 0.0 } else { (completed as f64 / total as f64) * 100.0 };
        Self { total, completed, status, pct }
    }

    fn unknown() -> Self {
        Self { total: 0, completed: 0, status: ProgressStatus::Unknown, pct: 0.0 }
    }
}

/// Owns the process-global external dependencies (§4.1) and presents a
/// scoped handle to the rest of the core. One instance per process.
pub struct Orchestrator {
    broker: Arc<dyn Broker>,
    runtime: Arc<InMemoryTaskRuntime>,
    proxy_pool: Arc<ProxyPool>,
    refresh_pipeline: Arc<RefreshPipeline>,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
    proxy_pool_config: ProxyPoolConfig,
    started: AtomicBool,
    consecutive_health_failures: std::sync::atomic::AtomicU32,
}

impl Orchestrator {
    pub fn new(
        broker: Arc<dyn Broker>,
        runtime: Arc<InMemoryTaskRuntime>,
        proxy_pool: Arc<ProxyPool>,
        refresh_pipeline: Arc<RefreshPipeline>,
        metrics: Arc<Metrics>,
        config: OrchestratorConfig,
        proxy_pool_config: ProxyPoolConfig,
    ) -> Self {
        Self {
            broker,
            runtime,
            proxy_pool,
            refresh_pipeline,
            metrics,
            config,
            proxy_pool_config,
            started: AtomicBool::new(false),
            consecutive_health_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Idempotent (§4.1): ensures the broker is reachable, the worker
    /// runtime is alive, and at least `min_proxies_for_scraping` validated
    /// proxies are published, triggering a refresh otherwise.
    ///
    /// Startup cleanup: the reference task runtime is in-process rather
    /// than a separate OS process tree, so the orphan-process-kill step
    /// (§4.1: "enumerates processes matching the worker and rotator command
    /// patterns and terminates them") degrades to reloading the proxy pool
    /// from whatever file a previous run last published — there is no
    /// separate process tree to enumerate. The [`health::HealthCheck`]
    /// boundary still allows a real deployment to do OS-level process
    /// enumeration without changing this method's contract.
    pub async fn start(&self) -> CoreResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let report = self.check_health().await;
        if !report.all_healthy() {
            self.started.store(false, Ordering::SeqCst);
            return Err(report.into_error());
        }

        self.proxy_pool
            .reload()
            .await
            .map_err(CoreError::from)?;

        let min_count = self.proxy_pool_config.min_proxies_for_scraping;
        if !self.ensure_proxies(min_count, self.proxy_pool_config.refresh_timeout).await? {
            let stats = self.proxy_pool.stats().await;
            self.started.store(false, Ordering::SeqCst);
            return Err(CoreError::InsufficientProxies { have: stats.total, need: min_count });
        }

        info!("orchestrator started");
        Ok(())
    }

    /// Tears down in reverse start order (§4.1). Guaranteed to run on
    /// normal exit, interrupt signals, and uncaught failures when driven
    /// through [`run_scoped`].
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.runtime.shutdown();
        info!("orchestrator stopped");
    }

    /// Broker PING (2s timeout), worker runtime control-plane ping (5s),
    /// and an optional rotator TCP connect (§4.1).
    pub async fn check_health(&self) -> HealthReport {
        health::check(self.broker.as_ref(), self.runtime.as_ref(), &self.config).await
    }

    /// Runs [`check_health`] on a fixed cadence and, once
    /// `max_consecutive_health_failures` consecutive checks come back
    /// unhealthy, cancels the worker runtime so in-flight tasks wind down
    /// cooperatively (§4.1: "three consecutive failures propagate as a
    /// fatal error"). Intended to be spawned alongside `start()`/`stop()`;
    /// exits as soon as `token` is cancelled.
    pub async fn run_health_monitor(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let report = self.check_health().await;
                    if report.all_healthy() {
                        self.consecutive_health_failures.store(0, Ordering::SeqCst);
                        continue;
                    }
                    let failures = self.consecutive_health_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(failures, max = self.config.max_consecutive_health_failures, ?report, "health check failed");
                    if failures >= self.config.max_consecutive_health_failures {
                        warn!("max consecutive health failures reached, cancelling worker runtime");
                        self.runtime.shutdown();
                        return;
                    }
                }
            }
        }
    }

    /// Blocks until the proxy pool holds at least `min_count` validated
    /// entries or `timeout` elapses (§4.1). Triggers a refresh whenever the
    /// currently-loaded pool falls short.
    pub async fn ensure_proxies(&self, min_count: usize, timeout: Duration) -> CoreResult<bool> {
        if self.proxy_pool.stats().await.total >= min_count {
            return Ok(true);
        }

        let handle = self.trigger_refresh();
        let satisfied = self
            .wait_for_refresh(&handle, timeout, min_count)
            .await;
        self.proxy_pool.reload().await.map_err(CoreError::from)?;
        Ok(satisfied && self.proxy_pool.stats().await.total >= min_count)
    }

    /// Enqueues the refresh chain (§4.2), returning immediately with a
    /// `{job_id, chord_id}` handle while the pipeline runs in the
    /// background on the shared task runtime.
    pub fn trigger_refresh(&self) -> RefreshHandle {
        let job_id = Uuid::new_v4().to_string();
        let pipeline = Arc::clone(&self.refresh_pipeline);
        let job_id_for_task = job_id.clone();
        tokio::spawn(async move {
            if let Err(err) = pipeline.run(&job_id_for_task).await {
                warn!(job_id = %job_id_for_task, error = %err, "proxy refresh pipeline failed");
            }
        });
        RefreshHandle { chord_id: job_id.clone(), job_id }
    }

    /// Blocks with the three-stage fallback (§4.2.5), delegating to
    /// [`crate::refresh::wait_for_refresh`].
    pub async fn wait_for_refresh(&self, handle: &RefreshHandle, timeout: Duration, min_count: usize) -> bool {
        let published_path = self
            .proxy_pool_config
            .published_dir
            .join(&self.proxy_pool_config.published_json_filename);
        wait_for_refresh(&self.broker, &handle.job_id, min_count, Path::new(&published_path), timeout).await
    }

    /// Enqueues a scrape job for `site_name`, returning immediately with a
    /// handle while the dispatcher runs on the shared task runtime (§4.1,
    /// §4.5). `run_site_scrape` is the free function in
    /// [`crate::scraping::dispatcher`]; this just owns the `job_id` and the
    /// spawn.
    pub fn start_site_scrape<F>(&self, job_id: String, work: F) -> ScrapeHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(work);
        ScrapeHandle { job_id }
    }

    /// `{total, completed, status, pct}` for any job, regardless of which
    /// pipeline produced it (§4.1). Tries the refresh namespace first, then
    /// the scraping namespace, since `job_id`s are opaque UUIDs with no
    /// structural hint about their origin.
    pub async fn progress(&self, job_id: &str) -> ProgressSnapshot {
        let refresh_key = format!("proxy_refresh:{job_id}:state");
        if let Ok(Some(job)) = self.broker.get_json::<RefreshJob>(&refresh_key).await {
            let status = match job.status {
                crate::refresh::JobStatus::Pending => ProgressStatus::Pending,
                crate::refresh::JobStatus::Running => ProgressStatus::Running,
                crate::refresh::JobStatus::Complete => ProgressStatus::Complete,
                crate::refresh::JobStatus::Failed => ProgressStatus::Failed,
            };
            return ProgressSnapshot::from_counts(job.total_chunks, job.completed_chunks, status);
        }

        let scraping_key = format!("scraping:{job_id}:state");
        if let Ok(Some(job)) = self.broker.get_json::<crate::scraping::ScrapeJob>(&scraping_key).await {
            let status = match job.status {
                crate::scraping::JobStatus::Pending => ProgressStatus::Pending,
                crate::scraping::JobStatus::Running => ProgressStatus::Running,
                crate::scraping::JobStatus::Complete => ProgressStatus::Complete,
                crate::scraping::JobStatus::Failed => ProgressStatus::Failed,
            };
            return ProgressSnapshot::from_counts(job.total_chunks, job.completed_chunks, status);
        }

        ProgressSnapshot::unknown()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.proxy_pool
    }
}

/// Drives `body` inside a scoped `start()`...`stop()` region (§4.1: "a
/// scoped resource guard around the whole `start()…stop()` region ensures
/// resources are released on any exit path"). Races `body` against
/// SIGINT/SIGTERM; whichever finishes first wins, and `stop()` always runs
/// before this function returns, regardless of which branch won or whether
/// `body` itself errored.
pub async fn run_scoped<F, Fut, T>(orchestrator: Arc<Orchestrator>, body: F) -> CoreResult<T>
where
    F: FnOnce(Arc<Orchestrator>) -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    orchestrator.start().await?;

    let result = tokio::select! {
        result = body(Arc::clone(&orchestrator)) => result,
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
            Err(CoreError::internal("shutdown signal received"))
        }
    };

    orchestrator.stop();
    result
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::fetcher::Fetcher;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct EmptyFetcher;

    #[async_trait]
    impl Fetcher for EmptyFetcher {
        async fn fetch(&self, _url: &str, _proxy: Option<&crate::proxy::Proxy>, _timeout: StdDuration) -> Result<bytes::Bytes, crate::errors::FetchError> {
            Err(crate::errors::FetchError::Timeout)
        }
    }

    fn build_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let runtime = Arc::new(InMemoryTaskRuntime::new());
        let metrics = Metrics::new();
        let proxy_pool_config = crate::config::ProxyPoolConfig {
            min_proxies_for_scraping: 1,
            max_consecutive_failures: 3,
            refresh_chunk_size: 10,
            refresh_timeout: StdDuration::from_millis(50),
            check_chunk_soft_limit: StdDuration::from_secs(5),
            check_chunk_hard_limit: StdDuration::from_secs(10),
            published_dir: dir.to_path_buf(),
            published_json_filename: "proxies.json".to_string(),
            published_text_filename: "proxies.txt".to_string(),
            judge_urls: vec![],
            ip_echo_urls: vec![],
            liveness_timeout: StdDuration::from_secs(2),
            candidate_source_url: String::new(),
        };
        let proxy_pool = Arc::new(ProxyPool::new(
            dir.join("proxies.json"),
            proxy_pool_config.max_consecutive_failures,
            Arc::clone(&metrics),
        ));
        let fetcher: Arc<dyn crate::fetcher::Fetcher> = Arc::new(EmptyFetcher);
        let refresh_pipeline = Arc::new(RefreshPipeline::new(
            Arc::clone(&broker),
            Arc::clone(&runtime),
            fetcher,
            proxy_pool_config.clone(),
            5,
            Arc::clone(&metrics),
            None,
        ));

        Orchestrator::new(
            broker,
            runtime,
            proxy_pool,
            refresh_pipeline,
            metrics,
            OrchestratorConfig::default(),
            proxy_pool_config,
        )
    }

    #[tokio::test]
    async fn ensure_proxies_succeeds_immediately_when_pool_already_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = crate::proxy::Proxy {
            host: "1.2.3.4".to_string(),
            port: 8080,
            protocol: crate::proxy::ProxyProtocol::Http,
            timeout_seconds: 1.0,
            anonymity: crate::proxy::Anonymity::Elite,
            exit_ip: "9.9.9.9".to_string(),
            ip_check_passed: true,
            verified_at: chrono::Utc::now(),
        };
        tokio::fs::write(dir.path().join("proxies.json"), serde_json::to_vec(&vec![proxy]).unwrap())
            .await
            .unwrap();

        let orchestrator = build_orchestrator(dir.path());
        orchestrator.proxy_pool().reload().await.unwrap();

        let satisfied = orchestrator.ensure_proxies(1, StdDuration::from_millis(50)).await.unwrap();
        assert!(satisfied);
    }

    #[tokio::test]
    async fn ensure_proxies_times_out_when_refresh_cannot_satisfy_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());

        let satisfied = orchestrator.ensure_proxies(1, StdDuration::from_millis(50)).await.unwrap();
        assert!(!satisfied);
    }

    #[tokio::test]
    async fn progress_reports_unknown_for_unrecognized_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        let snapshot = orchestrator.progress("no-such-job").await;
        assert_eq!(snapshot.status, ProgressStatus::Unknown);
    }

    #[test]
    fn stop_before_start_is_a_harmless_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(dir.path());
        orchestrator.stop();
    }
}

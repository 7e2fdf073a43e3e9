//! Proxy refresh pipeline (§4.2): `chain(Scrape, Dispatch) -> group(CheckChunk) -> Aggregate`,
//! composed over [`crate::runtime::InMemoryTaskRuntime::chord`].
//!
//! `chain` needs no dedicated type — it is the sequential `.await`s in
//! [`RefreshPipeline::run`] itself (scrape, then dispatch); `group`/`chord`
//! are what [`crate::runtime`] actually provides runtime support for.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sandboxed_file_manager::SandboxedManager;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerExt};
use crate::config::ProxyPoolConfig;
use crate::errors::{RefreshError, RefreshResult};
use crate::fetcher::Fetcher;
use crate::metrics::Metrics;
use crate::proxy::{Anonymity, Proxy, ProxyCandidate, ProxyId, ProxyProtocol};
use crate::runtime::{InMemoryTaskRuntime, TaskLimits};
use crate::utils::atomic_write;

use super::judge::{classify_anonymity, extract_candidate_ip, is_acceptable_exit_ip, parse_ip_echo_response};
use super::{JobStatus, RefreshJob};

/// A single probe attempt through a candidate proxy gets this much time;
/// deliberately independent of `liveness_timeout` in shape but reusing its
/// value, since both are "is this single request still alive" budgets.
fn probe_timeout(config: &ProxyPoolConfig) -> Duration {
    config.liveness_timeout
}

fn broker_key(job_id: &str, suffix: &str) -> String {
    format!("proxy_refresh:{job_id}:{suffix}")
}

fn events_channel(job_id: &str) -> String {
    format!("proxy_refresh:{job_id}:events")
}

fn job_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Shared, cheaply-cloneable context handed to each `CheckChunk` task
/// (§4.2.3). Tasks run as `'static` spawned futures (`group`'s contract), so
/// everything they need is captured by value rather than borrowed from the
/// pipeline.
#[derive(Clone)]
struct ChunkContext {
    fetcher: Arc<dyn Fetcher>,
    judge_urls: Arc<Vec<String>>,
    ip_echo_urls: Arc<Vec<String>>,
    probe_timeout: Duration,
    real_ip: Ipv4Addr,
    semaphore: Arc<Semaphore>,
    job_id: Arc<str>,
    broker: Arc<dyn Broker>,
    metrics: Arc<Metrics>,
}

/// Probes one candidate through its own proxy connection: liveness +
/// anonymity in a single fetch against a judge URL, then a quality probe
/// against an IP-echo service (§4.2.3 steps 1-4). Any failure along the way
/// is a silent drop, never a propagated error (§4.2.3: "failures are just
/// drops").
async fn probe_candidate(ctx: &ChunkContext, candidate: &ProxyCandidate) -> Option<Proxy> {
    let _permit = ctx.semaphore.acquire().await.ok()?;

    let placeholder = Proxy {
        host: candidate.host.clone(),
        port: candidate.port,
        protocol: candidate.protocol,
        timeout_seconds: 0.0,
        anonymity: Anonymity::Unknown,
        exit_ip: String::new(),
        ip_check_passed: false,
        verified_at: Utc::now(),
    };

    let mut judge_body: Option<bytes::Bytes> = None;
    let mut elapsed = Duration::ZERO;
    for judge_url in ctx.judge_urls.iter() {
        let started = Instant::now();
        match ctx.fetcher.fetch(judge_url, Some(&placeholder), ctx.probe_timeout).await {
            Ok(body) => {
                elapsed = started.elapsed();
                judge_body = Some(body);
                break;
            }
            Err(_) => continue,
        }
    }
    let judge_body = judge_body?;
    let body_text = String::from_utf8_lossy(&judge_body).into_owned();

    let anonymity = classify_anonymity(&body_text, ctx.real_ip);
    if matches!(anonymity, Anonymity::Transparent) {
        return None;
    }

    if let Some(provisional_ip) = extract_candidate_ip(&body_text, ctx.real_ip) {
        if !is_acceptable_exit_ip(provisional_ip, ctx.real_ip) {
            return None;
        }
    }

    let mut final_ip = None;
    for echo_url in ctx.ip_echo_urls.iter() {
        if let Ok(body) = ctx.fetcher.fetch(echo_url, Some(&placeholder), ctx.probe_timeout).await {
            if let Some(ip) = parse_ip_echo_response(&body) {
                final_ip = Some(ip);
                break;
            }
        }
    }
    let final_ip = final_ip?;
    if !is_acceptable_exit_ip(final_ip, ctx.real_ip) {
        return None;
    }

    Some(Proxy {
        host: candidate.host.clone(),
        port: candidate.port,
        protocol: candidate.protocol,
        timeout_seconds: elapsed.as_secs_f64(),
        anonymity,
        exit_ip: final_ip.to_string(),
        ip_check_passed: true,
        verified_at: Utc::now(),
    })
}

async fn check_chunk(ctx: ChunkContext, chunk: Vec<ProxyCandidate>, token: CancellationToken) -> Vec<Proxy> {
    let mut results = Vec::new();
    for candidate in &chunk {
        if token.is_cancelled() {
            break;
        }
        if let Some(proxy) = probe_candidate(&ctx, candidate).await {
            results.push(proxy);
        }
    }

    if let Ok(completed) = ctx.broker.incr(&broker_key(&ctx.job_id, "completed_chunks"), job_ttl()).await {
        ctx.metrics.incr_chunks_completed();
        info!(job_id = %ctx.job_id, completed, passing = results.len(), chunk_size = chunk.len(), "refresh chunk checked");
    }

    results
}

/// Drives the full refresh pipeline end to end (§4.2): scrape candidates,
/// dispatch them into chunks, check each chunk concurrently, aggregate into
/// the published pool.
pub struct RefreshPipeline {
    broker: Arc<dyn Broker>,
    runtime: Arc<InMemoryTaskRuntime>,
    fetcher: Arc<dyn Fetcher>,
    config: ProxyPoolConfig,
    within_worker_semaphore: usize,
    metrics: Arc<Metrics>,
    scratch: Option<SandboxedManager>,
    /// Detected once per pipeline instance and reused for every run it
    /// drives (§4.2.3 step 2: "the real local egress IP is detected once
    /// per process and cached"). Scoped to the pipeline rather than a
    /// process-global, so tests constructing independent pipelines never
    /// see each other's cached value.
    egress_ip: tokio::sync::OnceCell<Ipv4Addr>,
}

impl RefreshPipeline {
    pub fn new(
        broker: Arc<dyn Broker>,
        runtime: Arc<InMemoryTaskRuntime>,
        fetcher: Arc<dyn Fetcher>,
        config: ProxyPoolConfig,
        within_worker_semaphore: usize,
        metrics: Arc<Metrics>,
        scratch: Option<SandboxedManager>,
    ) -> Self {
        Self { broker, runtime, fetcher, config, within_worker_semaphore, metrics, scratch, egress_ip: tokio::sync::OnceCell::new() }
    }

    /// Scrape stage (§4.2.1): fetches the raw candidate list and, when a
    /// scratch file manager is configured, persists the raw response for
    /// audit/retention (it is cleanup-policy-managed, not correctness
    /// critical — the parsed candidates are what actually drive the pipeline).
    async fn scrape(&self, job_id: &str) -> RefreshResult<Vec<ProxyCandidate>> {
        if self.config.candidate_source_url.is_empty() {
            return Err(RefreshError::ScrapeFailed { message: "candidate_source_url is not configured".to_string() });
        }

        let body = self
            .fetcher
            .fetch(&self.config.candidate_source_url, None, probe_timeout(&self.config).max(Duration::from_secs(30)))
            .await
            .map_err(|e| RefreshError::ScrapeFailed { message: e.to_string() })?;

        if let Some(scratch) = &self.scratch {
            let path = format!("refresh/{job_id}/candidates.json");
            if let Err(err) = scratch.write(&path, body.as_ref()).await {
                warn!(job_id, error = %err, "failed to persist raw refresh candidates to scratch storage");
            }
        }

        serde_json::from_slice(&body).map_err(|e| RefreshError::MalformedCandidates { message: e.to_string() })
    }

    /// Dispatch stage (§4.2.2): chunks candidates and seeds broker-tracked
    /// job state.
    async fn dispatch(&self, job_id: &str, candidates: Vec<ProxyCandidate>) -> RefreshResult<Vec<Vec<ProxyCandidate>>> {
        let chunk_size = self.config.refresh_chunk_size.max(1);
        let chunks: Vec<Vec<ProxyCandidate>> = candidates.chunks(chunk_size).map(|c| c.to_vec()).collect();

        let job = RefreshJob {
            id: job_id.to_string(),
            total_chunks: chunks.len(),
            completed_chunks: 0,
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            published_count: 0,
        };
        self.broker
            .set_json(&broker_key(job_id, "state"), &job, job_ttl())
            .await
            .map_err(|e| RefreshError::ScrapeFailed { message: e.to_string() })?;
        self.broker.set(&broker_key(job_id, "completed_chunks"), b"0", job_ttl()).await.ok();

        Ok(chunks)
    }

    /// Aggregate stage (§4.2.4-4.2.5): merges this round's passing proxies
    /// into the existing published pool, latest-wins per identity, and
    /// atomically republishes both artifacts.
    async fn aggregate(
        &self,
        job_id: &str,
        real_ip: Ipv4Addr,
        total_chunks: usize,
        started_at: chrono::DateTime<Utc>,
        chunk_results: Vec<Vec<Proxy>>,
    ) -> RefreshResult<usize> {
        let mut merged: HashMap<ProxyId, Proxy> = HashMap::new();

        let existing_path = self.config.published_dir.join(&self.config.published_json_filename);
        if let Ok(bytes) = tokio::fs::read(&existing_path).await {
            if let Ok(existing) = serde_json::from_slice::<Vec<Proxy>>(&bytes) {
                for proxy in existing {
                    merged.insert(proxy.id(), proxy);
                }
            }
        }

        for proxy in chunk_results.into_iter().flatten() {
            merged.insert(proxy.id(), proxy);
        }

        let mut publishable: Vec<Proxy> = merged.into_values().filter(|p| p.is_publishable(real_ip)).collect();
        publishable.sort_by(|a, b| a.timeout_seconds.partial_cmp(&b.timeout_seconds).unwrap_or(std::cmp::Ordering::Equal));

        let json_bytes = serde_json::to_vec_pretty(&publishable)
            .map_err(|e| RefreshError::AggregateFailed { message: e.to_string() })?;
        let text_body = publishable.iter().map(|p| p.to_uri_line()).collect::<Vec<_>>().join("\n");

        let json_path = self.config.published_dir.join(&self.config.published_json_filename);
        let text_path = self.config.published_dir.join(&self.config.published_text_filename);
        atomic_write(&json_path, &json_bytes).await.map_err(|e| RefreshError::AggregateFailed { message: e.to_string() })?;
        atomic_write(&text_path, text_body.as_bytes()).await.map_err(|e| RefreshError::AggregateFailed { message: e.to_string() })?;

        self.metrics.add_proxies_published(publishable.len() as u64);

        let job = RefreshJob {
            id: job_id.to_string(),
            total_chunks,
            completed_chunks: total_chunks,
            status: JobStatus::Complete,
            started_at,
            finished_at: Some(Utc::now()),
            published_count: publishable.len(),
        };
        self.broker.set_json(&broker_key(job_id, "state"), &job, job_ttl()).await.ok();
        self.broker.publish(&events_channel(job_id), b"complete").await.ok();

        info!(job_id, published = publishable.len(), "proxy refresh aggregated and republished");
        Ok(publishable.len())
    }

    /// Detects (and caches for the process lifetime) the real local egress
    /// IP by fetching the configured IP-echo services directly, with no
    /// proxy (§4.2.3 step 2).
    async fn local_egress_ip(&self) -> RefreshResult<Ipv4Addr> {
        if let Some(cached) = self.egress_ip.get() {
            return Ok(*cached);
        }
        for url in &self.config.ip_echo_urls {
            if let Ok(body) = self.fetcher.fetch(url, None, self.config.liveness_timeout).await {
                if let Some(ip) = parse_ip_echo_response(&body) {
                    return Ok(*self.egress_ip.get_or_init(|| async move { ip }).await);
                }
            }
        }
        Err(RefreshError::ScrapeFailed { message: "could not determine local egress ip from any ip_echo_urls".to_string() })
    }

    /// Runs the whole pipeline: `chain(Scrape, Dispatch) -> chord(CheckChunk*, Aggregate)` (§4.2).
    pub async fn run(&self, job_id: &str) -> RefreshResult<RefreshJob> {
        let started_at = Utc::now();
        let real_ip = self.local_egress_ip().await?;
        let candidates = self.scrape(job_id).await?;
        let total_candidates = candidates.len();
        let chunks = self.dispatch(job_id, candidates).await?;
        let total_chunks = chunks.len();

        info!(job_id, total_candidates, total_chunks, "starting proxy refresh chunk checks");

        let ctx = ChunkContext {
            fetcher: Arc::clone(&self.fetcher),
            judge_urls: Arc::new(self.config.judge_urls.clone()),
            ip_echo_urls: Arc::new(self.config.ip_echo_urls.clone()),
            probe_timeout: probe_timeout(&self.config),
            real_ip,
            semaphore: Arc::new(Semaphore::new(self.within_worker_semaphore.max(1))),
            job_id: Arc::from(job_id),
            broker: Arc::clone(&self.broker),
            metrics: Arc::clone(&self.metrics),
        };

        let limits = TaskLimits { soft: self.config.check_chunk_soft_limit, hard: self.config.check_chunk_hard_limit };
        let tasks: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let ctx = ctx.clone();
                move |token: CancellationToken| check_chunk(ctx, chunk, token)
            })
            .collect();

        let chunk_results: Vec<Vec<Proxy>> = self
            .runtime
            .chord("proxy_refresh", limits, tasks, |outcomes| async move {
                outcomes.into_iter().filter_map(|o| o.into_completed()).collect()
            })
            .await;

        let published_count = self.aggregate(job_id, real_ip, total_chunks, started_at, chunk_results).await?;

        Ok(RefreshJob {
            id: job_id.to_string(),
            total_chunks,
            completed_chunks: total_chunks,
            status: JobStatus::Complete,
            started_at,
            finished_at: Some(Utc::now()),
            published_count,
        })
    }
}

/// Waits for a refresh job to reach [`JobStatus::Complete`] with at least
/// `min_count` published proxies, via the three-stage fallback in §4.1: a
/// broker pub/sub event, then broker polling every 15s, then published-file
/// mtime polling — each stage only engaged once the previous one times out.
/// All three stages share one overall deadline derived from `overall_timeout`
/// (§4.1: "blocks ... or `timeout` elapses"); a later stage never gets a
/// fresh budget independent of how much the earlier stages already spent.
pub async fn wait_for_refresh(
    broker: &Arc<dyn Broker>,
    job_id: &str,
    min_count: usize,
    published_json_path: &std::path::Path,
    overall_timeout: Duration,
) -> bool {
    let deadline = Instant::now() + overall_timeout;
    let remaining = |deadline: Instant| deadline.saturating_duration_since(Instant::now());

    let mut rx = broker.subscribe(&events_channel(job_id)).await;
    if tokio::time::timeout(remaining(deadline), rx.recv()).await.is_ok() {
        return job_satisfied(broker, job_id, min_count).await;
    }
    if Instant::now() >= deadline {
        return job_satisfied(broker, job_id, min_count).await;
    }

    warn!(job_id, "refresh event wait timed out, falling back to broker polling");
    while Instant::now() < deadline {
        if job_satisfied(broker, job_id, min_count).await {
            return true;
        }
        tokio::time::sleep(Duration::from_secs(15).min(remaining(deadline))).await;
    }
    if job_satisfied(broker, job_id, min_count).await {
        return true;
    }

    warn!(job_id, "refresh broker polling timed out, falling back to published-file mtime polling");
    let mut last_seen = tokio::fs::metadata(published_json_path).await.ok().and_then(|m| m.modified().ok());
    while Instant::now() < deadline {
        tokio::time::sleep(Duration::from_secs(5).min(remaining(deadline))).await;
        let current = tokio::fs::metadata(published_json_path).await.ok().and_then(|m| m.modified().ok());
        if current.is_some() && current != last_seen {
            last_seen = current;
            if count_published(published_json_path).await >= min_count {
                return true;
            }
        }
    }

    false
}

async fn job_satisfied(broker: &Arc<dyn Broker>, job_id: &str, min_count: usize) -> bool {
    match broker.get_json::<RefreshJob>(&broker_key(job_id, "state")).await {
        Ok(Some(job)) => matches!(job.status, JobStatus::Complete) && job.published_count >= min_count,
        _ => false,
    }
}

async fn count_published(path: &std::path::Path) -> usize {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice::<Vec<Proxy>>(&bytes).map(|v| v.len()).unwrap_or(0),
        Err(_) => 0,
    }
}

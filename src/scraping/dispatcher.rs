//! Site-scraping dispatcher (§4.5): walk a site's paginated search results,
//! dispatch the discovered detail URLs into chunks, scrape each chunk
//! through the full resilience stack (breaker, rate limiter, retry,
//! soft-block detection), and hand the extracted records to the sink with
//! cross-source linkage recorded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerExt};
use crate::config::ScrapingConfig;
use crate::errors::{ErrorKind, FetchError, RecoveryAction, ScrapingError, ScrapingResult};
use crate::extractor::{ListingRecord, SiteProfile};
use crate::fetcher::Fetcher;
use crate::linkage::{self, FingerprintInput, LinkageEntry};
use crate::metrics::Metrics;
use crate::proxy::{Proxy, ProxyPool};
use crate::resilience::{classify, Checkpoint, CircuitBreaker, FailureSignal, RateLimiter, RetryConfig};
use crate::runtime::{InMemoryTaskRuntime, TaskLimits};
use crate::sink::Sink;

use super::{JobStatus, ScrapeJob};

/// Pages walked before giving up even if the site never reports a last
/// page (§4.5 stage 1 safeguard against a pagination-control regression
/// turning into an infinite walk).
const MAX_PAGES: u32 = 500;

fn broker_key(job_id: &str, suffix: &str) -> String {
    format!("scraping:{job_id}:{suffix}")
}

fn events_channel(job_id: &str) -> String {
    format!("scraping:{job_id}:events")
}

fn job_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn domain_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// Resolves a result `href` against the page it was found on. Site
/// pagination contracts (§4.5 stage 1) return whatever `href` the markup
/// actually carries, which is commonly page-relative; callers downstream
/// (the per-domain breaker/rate limiter keyed off `domain_of`, the fetcher)
/// all need an absolute URL.
fn resolve_against(page_url: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(page_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

fn classify_fetch_error(err: &FetchError) -> ErrorKind {
    match err {
        FetchError::Timeout => classify(None, Some(FailureSignal::Timeout)),
        FetchError::Connection { .. } => classify(None, Some(FailureSignal::ConnectionRefused)),
        FetchError::Status { status } => classify(Some(*status), None),
        FetchError::Transport { .. } => classify(None, Some(FailureSignal::Unknown)),
        FetchError::Proxy { .. } => classify(None, Some(FailureSignal::ProxyFailure)),
    }
}

/// Everything a `ScrapeChunk` (or the pagination walk) needs to fetch one
/// URL through the full resilience stack (§4.5 stage 1/3).
#[derive(Clone)]
pub struct SiteContext {
    pub site: SiteProfile,
    pub fetcher: Arc<dyn Fetcher>,
    pub pool: Arc<ProxyPool>,
    pub breaker: Arc<dyn CircuitBreaker>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub retry_config: RetryConfig,
    pub fetch_timeout: Duration,
    pub soft_block_min_size_bytes: usize,
    pub metrics: Arc<Metrics>,
}

/// Fetches `url` through a pool-selected proxy, gated by the per-domain
/// breaker and rate limiter and wrapped in retry-with-backoff (§4.4). A
/// `Proxy`-classified failure rotates to a fresh pool selection and retries
/// immediately once, per §7's `RETRY_WITH_PROXY_ROTATION` recovery action,
/// before any later attempt falls back to normal backoff. A soft-block
/// verdict on the response body counts as a failure too. Returns `None` on
/// any unrecoverable outcome — per-URL failures are drops, never propagated
/// errors (§4.5, §7).
async fn fetch_resilient(ctx: &SiteContext, url: &str) -> Option<bytes::Bytes> {
    let domain = domain_of(url)?;

    if !ctx.breaker.can_request(&domain).await {
        return None;
    }
    if !ctx.rate_limiter.acquire(&domain, true).await {
        return None;
    }

    let proxy_slot: Arc<StdMutex<Option<Proxy>>> = Arc::new(StdMutex::new(ctx.pool.select().await.ok()));

    let result = crate::resilience::retry_with_backoff(&ctx.retry_config, &ctx.metrics, url, || {
        let proxy_slot = Arc::clone(&proxy_slot);
        async move {
            let current = proxy_slot.lock().expect("proxy slot mutex poisoned").clone();
            match ctx.fetcher.fetch(url, current.as_ref(), ctx.fetch_timeout).await {
                Ok(body) => crate::resilience::AttemptOutcome::Success(body),
                Err(err) => {
                    let kind = classify_fetch_error(&err);
                    if let Some(p) = &current {
                        ctx.pool.record(p, false).await;
                    }
                    let retry_after = if kind.recovery_action() == RecoveryAction::RetryWithProxyRotation {
                        let next = ctx.pool.select().await.ok();
                        *proxy_slot.lock().expect("proxy slot mutex poisoned") = next;
                        Some(Duration::ZERO)
                    } else {
                        None
                    };
                    crate::resilience::AttemptOutcome::Failed { kind, retry_after }
                }
            }
        }
    })
    .await;

    // Whatever attempt ultimately succeeded (or the last one tried) left its
    // proxy here; per-attempt failures were already recorded inside the loop.
    let final_proxy = proxy_slot.lock().expect("proxy slot mutex poisoned").clone();

    match result {
        Ok(body) => {
            let verdict = crate::resilience::soft_block::detect(&body, ctx.soft_block_min_size_bytes);
            if verdict.blocked {
                warn!(url, reason = %verdict.reason, "soft-block detected, treating as failure");
                if let Some(p) = &final_proxy {
                    ctx.pool.record(p, false).await;
                }
                ctx.breaker.record_failure(&domain, ErrorKind::HttpBlocked).await;
                return None;
            }
            if let Some(p) = &final_proxy {
                ctx.pool.record(p, true).await;
            }
            ctx.breaker.record_success(&domain).await;
            Some(body)
        }
        Err(kind) => {
            ctx.breaker.record_failure(&domain, kind).await;
            None
        }
    }
}

/// Pagination walk (§4.5 stage 1): fetches search-result pages in order
/// until the site signals the last page, collecting every detail URL along
/// the way. A first-page failure aborts the whole site with an error;
/// later-page failures end the walk early with whatever URLs were already
/// found, since a transient failure mid-walk should not discard the prior
/// pages' results.
pub async fn collect_urls(ctx: &SiteContext, site_name: &str, base_url: &str) -> ScrapingResult<Vec<String>> {
    let mut urls = Vec::new();
    let mut page = 1u32;
    let mut url = ctx.site.first_search_url(base_url);

    loop {
        let body = match fetch_resilient(ctx, &url).await {
            Some(body) => body,
            None if page == 1 => {
                return Err(ScrapingError::PaginationFailed {
                    site: site_name.to_string(),
                    message: format!("failed to fetch first search page {url}"),
                });
            }
            None => {
                warn!(site = site_name, page, "pagination walk stopped early after fetch failure");
                break;
            }
        };

        urls.extend(ctx.site.parse_results(&body).into_iter().filter_map(|href| resolve_against(&url, &href)));

        if ctx.site.is_last_page(&body, page) || page >= MAX_PAGES {
            break;
        }
        page += 1;
        url = ctx.site.next_url(base_url, page);
    }

    info!(site = site_name, pages = page, urls = urls.len(), "pagination walk complete");
    Ok(urls)
}

/// Checkpoint progress (§4.4.6) shared by every chunk of one site scrape:
/// the full URL set dispatched this run plus a running tally of which ones
/// have already been attempted, so a killed worker resumes from `pending`
/// instead of redoing already-scraped URLs.
struct CheckpointProgress {
    checkpoint: Arc<Checkpoint>,
    all_urls: Vec<String>,
    scraped: AsyncMutex<HashSet<String>>,
}

impl CheckpointProgress {
    async fn mark_attempted(&self, url: &str) {
        let snapshot = {
            let mut scraped = self.scraped.lock().await;
            scraped.insert(url.to_string());
            scraped.clone()
        };
        let pending: Vec<String> = self.all_urls.iter().filter(|u| !snapshot.contains(*u)).cloned().collect();
        self.checkpoint.save(&snapshot, &pending, false).await.ok();
    }

    async fn finish(&self) {
        let snapshot = self.scraped.lock().await.clone();
        self.checkpoint.save(&snapshot, &[], true).await.ok();
        self.checkpoint.clear().await.ok();
    }
}

#[allow(clippy::too_many_arguments)]
async fn scrape_chunk(
    ctx: SiteContext,
    job_id: Arc<str>,
    broker: Arc<dyn Broker>,
    metrics: Arc<Metrics>,
    urls: Vec<String>,
    progress: Option<Arc<CheckpointProgress>>,
    token: CancellationToken,
) -> Vec<ListingRecord> {
    let mut records = Vec::new();
    for url in &urls {
        if token.is_cancelled() {
            break;
        }
        let body = fetch_resilient(&ctx, url).await;
        if let Some(progress) = &progress {
            progress.mark_attempted(url).await;
        }
        let Some(body) = body else { continue };
        if let Some(record) = ctx.site.extract(&body, url) {
            records.push(record);
        }
    }

    if let Ok(completed) = broker.incr(&broker_key(&job_id, "completed_chunks"), job_ttl()).await {
        metrics.incr_chunks_completed();
        info!(job_id = %job_id, completed, extracted = records.len(), chunk_size = urls.len(), "scrape chunk complete");
    }

    records
}

/// Aggregate stage (§4.5 stage 4, §4.6): upserts every extracted record and
/// records its cross-source linkage entry so discrepancy detection can run.
async fn aggregate_site(
    sink: &Arc<dyn Sink>,
    broker: &Arc<dyn Broker>,
    metrics: &Arc<Metrics>,
    job_id: &str,
    site_name: &str,
    total_chunks: usize,
    started_at: chrono::DateTime<Utc>,
    chunk_results: Vec<Vec<ListingRecord>>,
) -> ScrapingResult<usize> {
    let records: Vec<ListingRecord> = chunk_results.into_iter().flatten().collect();

    sink.upsert_many(&records).await.map_err(|e| ScrapingError::AggregateFailed { message: e.to_string() })?;

    let now = Utc::now();
    let entries: Vec<LinkageEntry> = records
        .iter()
        .map(|record| LinkageEntry {
            fingerprint: linkage::fingerprint(&FingerprintInput {
                neighborhood: record.neighborhood.clone(),
                sqm: record.sqm,
                rooms: record.rooms,
                floor: record.floor,
                building_type: record.building_type.clone(),
            }),
            record_id: record.url.clone(),
            source: site_name.to_string(),
            source_url: record.url.clone(),
            price: record.price,
            first_seen: now,
            last_seen: now,
        })
        .collect();
    sink.add_sources_many(&entries).await.map_err(|e| ScrapingError::AggregateFailed { message: e.to_string() })?;

    metrics.add_records_upserted(records.len() as u64);

    let job = ScrapeJob {
        id: job_id.to_string(),
        site: site_name.to_string(),
        total_chunks,
        completed_chunks: total_chunks,
        status: JobStatus::Complete,
        started_at,
        finished_at: Some(now),
        records_extracted: records.len(),
    };
    broker.set_json(&broker_key(job_id, "state"), &job, job_ttl()).await.ok();
    broker.publish(&events_channel(job_id), b"complete").await.ok();

    info!(job_id, site = site_name, extracted = records.len(), "site scrape aggregated");
    Ok(records.len())
}

/// Drives one site's full scrape (§4.5): pagination walk, chunk dispatch,
/// `chord(ScrapeChunk*, AggregateSite)`. When `checkpoint` is given and an
/// earlier run left URLs `pending`, that set is resumed instead of
/// re-walking pagination from scratch (§4.4.6).
#[allow(clippy::too_many_arguments)]
pub async fn run_site_scrape(
    runtime: &Arc<InMemoryTaskRuntime>,
    sink: Arc<dyn Sink>,
    broker: Arc<dyn Broker>,
    metrics: Arc<Metrics>,
    ctx: SiteContext,
    config: &ScrapingConfig,
    site_name: &str,
    base_url: &str,
    job_id: &str,
    checkpoint: Option<Arc<Checkpoint>>,
) -> ScrapingResult<ScrapeJob> {
    let resumed = match &checkpoint {
        Some(cp) => {
            let data = cp.load().await.unwrap_or_default();
            if !data.pending.is_empty() {
                info!(site = site_name, pending = data.pending.len(), scraped = data.scraped.len(), "resuming site scrape from checkpoint");
                Some(data)
            } else {
                None
            }
        }
        None => None,
    };

    let (urls, initial_scraped) = match resumed {
        Some(data) => (data.pending, data.scraped),
        None => (collect_urls(&ctx, site_name, base_url).await?, HashSet::new()),
    };

    let progress = checkpoint.map(|cp| {
        Arc::new(CheckpointProgress {
            checkpoint: cp,
            all_urls: urls.clone(),
            scraped: AsyncMutex::new(initial_scraped),
        })
    });

    let chunk_size = config.chunk_size.max(1);
    let chunks: Vec<Vec<String>> = urls.chunks(chunk_size).map(|c| c.to_vec()).collect();
    let total_chunks = chunks.len();
    let started_at = Utc::now();

    let job = ScrapeJob {
        id: job_id.to_string(),
        site: site_name.to_string(),
        total_chunks,
        completed_chunks: 0,
        status: JobStatus::Running,
        started_at,
        finished_at: None,
        records_extracted: 0,
    };
    broker
        .set_json(&broker_key(job_id, "state"), &job, job_ttl())
        .await
        .map_err(|e| ScrapingError::AggregateFailed { message: e.to_string() })?;
    broker.set(&broker_key(job_id, "completed_chunks"), b"0", job_ttl()).await.ok();

    info!(job_id, site = site_name, urls = urls.len(), total_chunks, "starting site scrape chunks");

    let limits = TaskLimits { soft: config.chunk_soft_limit, hard: config.chunk_hard_limit };
    let job_id_arc: Arc<str> = Arc::from(job_id);
    let tasks: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            let ctx = ctx.clone();
            let job_id_arc = Arc::clone(&job_id_arc);
            let broker = Arc::clone(&broker);
            let metrics = Arc::clone(&metrics);
            let progress = progress.clone();
            move |token: CancellationToken| scrape_chunk(ctx, job_id_arc, broker, metrics, chunk, progress, token)
        })
        .collect();

    let chunk_results: Vec<Vec<ListingRecord>> = runtime
        .chord("site_scrape", limits, tasks, |outcomes| async move {
            outcomes.into_iter().filter_map(|o| o.into_completed()).collect()
        })
        .await;

    if let Some(progress) = &progress {
        progress.finish().await;
    }

    let records_extracted = aggregate_site(
        &sink,
        &broker,
        &metrics,
        job_id,
        site_name,
        total_chunks,
        started_at,
        chunk_results,
    )
    .await?;

    Ok(ScrapeJob {
        id: job_id.to_string(),
        site: site_name.to_string(),
        total_chunks,
        completed_chunks: total_chunks,
        status: JobStatus::Complete,
        started_at,
        finished_at: Some(Utc::now()),
        records_extracted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::resilience::{CircuitBreakerConfig, LocalCircuitBreaker, LocalRateLimiter};
    use crate::sink::SqliteSink;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const SEARCH_PAGE_1: &str = r#"
        <html><body>
            <a class="listing-card" href="/ad/1">one</a>
            <a class="listing-card" href="/ad/2">two</a>
            <a class="pagination-next" href="?page=2">Next</a>
        </body></html>
    "#;
    const SEARCH_PAGE_2: &str = r#"
        <html><body>
            <a class="listing-card" href="/ad/3">three</a>
        </body></html>
    "#;
    const DETAIL_PAGE: &str = r#"
        <html><body>
            <span class="listing-price">150,000 EUR</span>
            <span class="listing-neighborhood">Lozenets</span>
            <span class="listing-building-type">brick</span>
            <span class="listing-sqm">85 sq.m.</span>
            <span class="listing-rooms">3 rooms</span>
            <span class="listing-floor">3</span>
        </body></html>
    "#;

    struct ScriptedFetcher {
        pages: HashMap<String, &'static str>,
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str, _proxy: Option<&Proxy>, _timeout: Duration) -> Result<bytes::Bytes, FetchError> {
            if url.contains("page=1") || !url.contains("page=") {
                return Ok(bytes::Bytes::from_static(SEARCH_PAGE_1.as_bytes()));
            }
            if url.contains("page=2") {
                return Ok(bytes::Bytes::from_static(SEARCH_PAGE_2.as_bytes()));
            }
            if let Some(body) = self.pages.get(url) {
                return Ok(bytes::Bytes::from_static(body.as_bytes()));
            }
            Ok(bytes::Bytes::from_static(DETAIL_PAGE.as_bytes()))
        }
    }

    fn pool_dir_empty() -> ProxyPool {
        ProxyPool::new(std::path::PathBuf::from("/nonexistent/proxies.json"), 3, Metrics::new())
    }

    struct FailsOnceThenSucceeds {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Fetcher for FailsOnceThenSucceeds {
        async fn fetch(&self, _url: &str, _proxy: Option<&Proxy>, _timeout: Duration) -> Result<bytes::Bytes, FetchError> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                Err(FetchError::Proxy { message: "proxy refused connection".to_string() })
            } else {
                Ok(bytes::Bytes::from_static(DETAIL_PAGE.as_bytes()))
            }
        }
    }

    #[tokio::test]
    async fn proxy_classified_failure_rotates_and_retries_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = crate::proxy::Proxy {
            host: "1.2.3.4".to_string(),
            port: 8080,
            protocol: crate::proxy::ProxyProtocol::Http,
            timeout_seconds: 1.0,
            anonymity: crate::proxy::Anonymity::Elite,
            exit_ip: "9.9.9.9".to_string(),
            ip_check_passed: true,
            verified_at: Utc::now(),
        };
        let pool_path = dir.path().join("proxies.json");
        tokio::fs::write(&pool_path, serde_json::to_vec(&vec![proxy]).unwrap()).await.unwrap();
        let pool = Arc::new(ProxyPool::new(pool_path, 3, Metrics::new()));
        pool.reload().await.unwrap();

        let ctx = SiteContext {
            site: SiteProfile::ListingsBg,
            fetcher: Arc::new(FailsOnceThenSucceeds { calls: std::sync::atomic::AtomicU32::new(0) }),
            pool,
            breaker: Arc::new(LocalCircuitBreaker::new(
                CircuitBreakerConfig { fail_max: 5, reset_timeout: Duration::from_secs(60), half_open_max: 2 },
                Metrics::new(),
            )),
            rate_limiter: Arc::new(LocalRateLimiter::new(1000, HashMap::new(), Metrics::new())),
            // A long base delay makes it obvious whether the proxy-rotation
            // path actually retried immediately (fast) instead of falling
            // through to the normal backoff schedule (slow).
            retry_config: RetryConfig { max_attempts: 3, base_delay: Duration::from_secs(5), max_delay: Duration::from_secs(10), jitter_factor: 0.0 },
            fetch_timeout: Duration::from_secs(5),
            soft_block_min_size_bytes: 10,
            metrics: Metrics::new(),
        };

        let started = std::time::Instant::now();
        let body = fetch_resilient(&ctx, "https://listings.bg/ad/1").await;
        let elapsed = started.elapsed();

        assert!(body.is_some(), "the retry after proxy rotation should have succeeded");
        assert!(elapsed < Duration::from_millis(500), "RETRY_WITH_PROXY_ROTATION must retry immediately, not back off, took {elapsed:?}");
    }

    #[test]
    fn resolve_against_joins_relative_and_passes_through_absolute() {
        assert_eq!(
            resolve_against("https://listings.bg/sales/apartments?page=1", "/ad/1"),
            Some("https://listings.bg/ad/1".to_string())
        );
        assert_eq!(
            resolve_against("https://listings.bg/sales/apartments?page=1", "https://other.tld/ad/9"),
            Some("https://other.tld/ad/9".to_string())
        );
    }

    #[tokio::test]
    async fn full_site_scrape_extracts_and_upserts_all_pages() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let sink: Arc<dyn Sink> = Arc::new(SqliteSink::connect(&format!("sqlite://{}", db_path.display()), 5, Metrics::new()).await.unwrap());
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let runtime = Arc::new(InMemoryTaskRuntime::new());
        let metrics = Metrics::new();

        let ctx = SiteContext {
            site: SiteProfile::ListingsBg,
            fetcher: Arc::new(ScriptedFetcher { pages: HashMap::new() }),
            pool: Arc::new(pool_dir_empty()),
            breaker: Arc::new(LocalCircuitBreaker::new(
                CircuitBreakerConfig { fail_max: 5, reset_timeout: Duration::from_secs(60), half_open_max: 2 },
                Metrics::new(),
            )),
            rate_limiter: Arc::new(LocalRateLimiter::new(1000, HashMap::new(), Metrics::new())),
            retry_config: RetryConfig { max_attempts: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), jitter_factor: 0.0 },
            fetch_timeout: Duration::from_secs(5),
            soft_block_min_size_bytes: 10,
            metrics: Metrics::new(),
        };

        let job = run_site_scrape(&runtime, sink, broker, metrics, ctx, &ScrapingConfig::default(), "listings.bg", "https://listings.bg", "job-scrape-1", None)
            .await
            .unwrap();

        assert!(matches!(job.status, JobStatus::Complete));
        assert_eq!(job.records_extracted, 3);
    }

    #[tokio::test]
    async fn resumes_from_checkpoint_pending_urls_instead_of_repaginating() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sink.db");
        let sink: Arc<dyn Sink> = Arc::new(SqliteSink::connect(&format!("sqlite://{}", db_path.display()), 5, Metrics::new()).await.unwrap());
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let runtime = Arc::new(InMemoryTaskRuntime::new());
        let metrics = Metrics::new();

        let checkpoint = Arc::new(Checkpoint::new(dir.path(), "listings.bg", 1));
        let pending = vec!["https://listings.bg/ad/9".to_string()];
        checkpoint.save(&HashSet::new(), &pending, true).await.unwrap();

        let ctx = SiteContext {
            site: SiteProfile::ListingsBg,
            fetcher: Arc::new(ScriptedFetcher { pages: HashMap::new() }),
            pool: Arc::new(pool_dir_empty()),
            breaker: Arc::new(LocalCircuitBreaker::new(
                CircuitBreakerConfig { fail_max: 5, reset_timeout: Duration::from_secs(60), half_open_max: 2 },
                Metrics::new(),
            )),
            rate_limiter: Arc::new(LocalRateLimiter::new(1000, HashMap::new(), Metrics::new())),
            retry_config: RetryConfig { max_attempts: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), jitter_factor: 0.0 },
            fetch_timeout: Duration::from_secs(5),
            soft_block_min_size_bytes: 10,
            metrics: Metrics::new(),
        };

        let job = run_site_scrape(
            &runtime,
            sink,
            broker,
            metrics,
            ctx,
            &ScrapingConfig::default(),
            "listings.bg",
            "https://listings.bg",
            "job-scrape-resume",
            Some(Arc::clone(&checkpoint)),
        )
        .await
        .unwrap();

        // Only the one pending URL is scraped, never re-walking pagination.
        assert_eq!(job.records_extracted, 1);
        let data = checkpoint.load().await.unwrap();
        assert!(data.pending.is_empty(), "checkpoint should be cleared after a completed run");
    }
}

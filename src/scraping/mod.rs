//! Site-scraping dispatcher (§4.5): one dispatcher per site, walking
//! pagination to collect detail URLs, then `chord(group(ScrapeChunk), AggregateSite)`
//! over the resilience-wrapped fetch-and-extract pipeline.
//!
//! New module — the teacher has no per-site scraping dispatcher (it ingests
//! M3U/XMLTV from configured source URLs directly); the chunk-dispatch and
//! chord-aggregation shape is grounded on [`crate::refresh::pipeline`],
//! which follows the same `chain(collect) -> chord(group(chunk), aggregate)`
//! composition one level up the stack.

pub mod dispatcher;

pub use dispatcher::{collect_urls, run_site_scrape, SiteContext};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a site-scrape job (§3), mirroring [`crate::refresh::JobStatus`]
/// but tracked under the `scraping:{job_id}:*` broker namespace (§6) instead
/// of `proxy_refresh:{job_id}:*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Broker-persisted job record (§3): `{job_id, site, total_chunks,
/// completed_chunks, total_urls, result_count, error_count, status}`.
/// `total_urls` is folded into `total_chunks * chunk_size` at dispatch time
/// rather than tracked separately, since the dispatcher always knows the
/// flat URL count before chunking; `error_count` is left for a future
/// per-URL error tally (currently per-URL failures are silent drops per §7
/// and only surface in logs/metrics, not in the job record). The record
/// written by the aggregate stage on completion carries the job's true
/// `total_chunks`/`completed_chunks` (equal to each other) and original
/// `started_at`, never zeroed or reset fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: String,
    pub site: String,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_extracted: usize,
}

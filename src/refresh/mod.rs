//! Proxy refresh pipeline (§4.2): `Scrape -> Dispatch -> CheckChunk[xN] -> Aggregate`,
//! turning a raw list of candidate proxies into the published, quality-filtered
//! pool [`crate::proxy::ProxyPool`] reloads from.
//!
//! New module — the teacher has no equivalent pipeline (its closest analogue,
//! `job_scheduling`, schedules individual jobs rather than composing
//! multi-stage fan-out/fan-in pipelines); grounded on [`crate::runtime`]'s
//! chord primitive plus the per-candidate checks described in §4.2.3.

pub mod judge;
pub mod pipeline;

pub use pipeline::{wait_for_refresh, RefreshPipeline};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a refresh job (§3), tracked in the broker under
/// `proxy_refresh:{job_id}:state` and surfaced to orchestrator progress
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Broker-persisted job record (§3). While a job is running, the
/// authoritative completed-chunk count lives in the separate
/// `completed_chunks` counter key, incremented atomically by each
/// `CheckChunk` task via `Broker::incr`; the record written by the
/// aggregate stage on completion carries the final `total_chunks`/
/// `completed_chunks` (equal to each other) so a reader of the terminal
/// state never observes a regression to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshJob {
    pub id: String,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub published_count: usize,
}

//! Sink contract (§6, §5): `upsert`/`add_source` plus batched variants,
//! backed by a `sqlx::SqlitePool` in WAL mode with single-writer discipline
//! and a busy-retry wrapper on every DB-touching call (§5: "at least 5
//! attempts with exponential backoff").
//!
//! Grounded on `utils/sqlite.rs` (datetime parsing helpers, kept near-
//! verbatim in [`crate::utils::sqlite`]) and the retry-loop shape of
//! `utils/database_retry.rs`'s `with_retry` (attempt counter, exponential
//! delay, only retrying on `SQLITE_BUSY`/`SQLITE_LOCKED`); that file itself
//! targets a since-deleted `RepositoryError` hierarchy so the loop is
//! rebuilt here against this crate's own `SinkError`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::errors::{SinkError, SinkResult};
use crate::extractor::ListingRecord;
use crate::linkage::{self, FingerprintInput, LinkageEntry};
use crate::metrics::Metrics;
use crate::utils::{format_datetime_for_sqlite, SqliteRowExt};

/// Record + linkage persistence, keyed by `url` (§6). Batched variants are
/// the ones the scraping aggregator actually calls (§4.5 stage 4).
#[async_trait]
pub trait Sink: Send + Sync {
    async fn upsert(&self, record: &ListingRecord) -> SinkResult<()>;
    async fn add_source(&self, entry: &LinkageEntry) -> SinkResult<()>;

    async fn upsert_many(&self, records: &[ListingRecord]) -> SinkResult<()> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(())
    }

    async fn add_sources_many(&self, entries: &[LinkageEntry]) -> SinkResult<()> {
        for entry in entries {
            self.add_source(entry).await?;
        }
        Ok(())
    }
}

fn is_retryable(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some("5") || db_err.message().to_lowercase().contains("busy") || db_err.message().to_lowercase().contains("locked")
    )
}

/// Runs `operation` up to `attempts` times, retrying only on SQLite
/// busy/locked errors with exponential backoff (§5).
async fn with_busy_retry<T, F, Fut>(attempts: u32, operation_name: &str, mut operation: F) -> SinkResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    for attempt in 1..=attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < attempts => {
                let delay = Duration::from_millis(50 * 2u64.pow(attempt - 1));
                warn!(operation_name, attempt, attempts, ?delay, error = %err, "sink operation busy, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) if is_retryable(&err) => {
                debug!(operation_name, error = %err, "busy-retry budget exhausted");
                return Err(SinkError::RetryBudgetExhausted { operation: operation_name.to_string(), attempts });
            }
            Err(err) => return Err(SinkError::Database(err)),
        }
    }
    unreachable!("loop always returns on its last iteration")
}

/// `sqlx::SqlitePool`-backed reference sink (§10.4). WAL mode and a busy
/// timeout are set at connection time so concurrent readers never block a
/// single in-flight writer (§5).
pub struct SqliteSink {
    pool: SqlitePool,
    busy_retry_attempts: u32,
    metrics: Arc<Metrics>,
}

impl SqliteSink {
    pub async fn connect(database_url: &str, busy_retry_attempts: u32, metrics: Arc<Metrics>) -> SinkResult<Self> {
        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(SinkError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.map_err(SinkError::Database)?;

        let sink = Self { pool, busy_retry_attempts, metrics };
        sink.migrate().await?;
        Ok(sink)
    }

    /// Schema initialization, run once at startup behind the pool's single
    /// writer connection (§5: "guarded by a file lock — never on module
    /// import"; here the single `max_connections(1)` writer pool already
    /// serializes this against any other in-process caller).
    async fn migrate(&self) -> SinkResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                url TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                price REAL NOT NULL,
                neighborhood TEXT NOT NULL,
                sqm REAL,
                rooms INTEGER,
                floor INTEGER,
                building_type TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(SinkError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS linkage (
                fingerprint TEXT NOT NULL,
                record_id TEXT NOT NULL,
                source TEXT NOT NULL,
                source_url TEXT NOT NULL,
                price REAL NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (fingerprint, source)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(SinkError::Database)?;

        Ok(())
    }

    /// Every source row sharing `fingerprint`, for price-discrepancy checks
    /// (§4.6). Exposed for the scraping aggregator's post-upsert linkage
    /// pass.
    pub async fn linkage_entries_for(&self, fingerprint: &str) -> SinkResult<Vec<LinkageEntry>> {
        let rows = with_busy_retry(self.busy_retry_attempts, "select_linkage", || {
            sqlx::query("SELECT fingerprint, record_id, source, source_url, price, first_seen, last_seen FROM linkage WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_all(&self.pool)
        })
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LinkageEntry {
                fingerprint: row.get("fingerprint"),
                record_id: row.get("record_id"),
                source: row.get("source"),
                source_url: row.get("source_url"),
                price: row.get("price"),
                first_seen: row.get_datetime("first_seen"),
                last_seen: row.get_datetime("last_seen"),
            })
            .collect())
    }
}

#[async_trait]
impl Sink for SqliteSink {
    async fn upsert(&self, record: &ListingRecord) -> SinkResult<()> {
        let fingerprint = linkage::fingerprint(&FingerprintInput {
            neighborhood: record.neighborhood.clone(),
            sqm: record.sqm,
            rooms: record.rooms,
            floor: record.floor,
            building_type: record.building_type.clone(),
        });
        let now = format_datetime_for_sqlite(Utc::now());

        with_busy_retry(self.busy_retry_attempts, "upsert_record", || {
            sqlx::query(
                r#"
                INSERT INTO records (url, source, price, neighborhood, sqm, rooms, floor, building_type, fingerprint, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    source = excluded.source,
                    price = excluded.price,
                    neighborhood = excluded.neighborhood,
                    sqm = excluded.sqm,
                    rooms = excluded.rooms,
                    floor = excluded.floor,
                    building_type = excluded.building_type,
                    fingerprint = excluded.fingerprint,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.url)
            .bind(&record.source)
            .bind(record.price)
            .bind(&record.neighborhood)
            .bind(record.sqm)
            .bind(record.rooms.map(|r| r as i64))
            .bind(record.floor)
            .bind(&record.building_type)
            .bind(&fingerprint)
            .bind(&now)
            .execute(&self.pool)
        })
        .await?;

        self.metrics.add_records_upserted(1);
        Ok(())
    }

    async fn add_source(&self, entry: &LinkageEntry) -> SinkResult<()> {
        with_busy_retry(self.busy_retry_attempts, "add_source", || {
            sqlx::query(
                r#"
                INSERT INTO linkage (fingerprint, record_id, source, source_url, price, first_seen, last_seen)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(fingerprint, source) DO UPDATE SET
                    record_id = excluded.record_id,
                    source_url = excluded.source_url,
                    price = excluded.price,
                    last_seen = excluded.last_seen
                "#,
            )
            .bind(&entry.fingerprint)
            .bind(&entry.record_id)
            .bind(&entry.source)
            .bind(&entry.source_url)
            .bind(entry.price)
            .bind(format_datetime_for_sqlite(entry.first_seen))
            .bind(format_datetime_for_sqlite(entry.last_seen))
            .execute(&self.pool)
        })
        .await?;

        if let Ok(siblings) = self.linkage_entries_for(&entry.fingerprint).await {
            if linkage::detect_discrepancy(&siblings, linkage::PRICE_DISCREPANCY_THRESHOLD_PCT).is_some() {
                self.metrics.incr_price_discrepancies();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(url: &str, price: f64) -> ListingRecord {
        ListingRecord {
            url: url.to_string(),
            source: "listings.bg".to_string(),
            price,
            neighborhood: "Lozenets".to_string(),
            sqm: Some(85.0),
            rooms: Some(3),
            floor: Some(3),
            building_type: "brick".to_string(),
        }
    }

    async fn sink_in(dir: &std::path::Path) -> SqliteSink {
        let path = dir.join("sink.db");
        let url = format!("sqlite://{}", path.display());
        SqliteSink::connect(&url, 5, Metrics::new()).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path()).await;
        let record = sample_record("https://listings.bg/ad/1", 150_000.0);

        sink.upsert(&record).await.unwrap();
        sink.upsert(&record).await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM records").fetch_one(&sink.pool).await.unwrap().get("c");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_updates_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path()).await;
        sink.upsert(&sample_record("https://listings.bg/ad/1", 150_000.0)).await.unwrap();
        sink.upsert(&sample_record("https://listings.bg/ad/1", 145_000.0)).await.unwrap();

        let price: f64 = sqlx::query("SELECT price FROM records WHERE url = ?")
            .bind("https://listings.bg/ad/1")
            .fetch_one(&sink.pool)
            .await
            .unwrap()
            .get("price");
        assert_eq!(price, 145_000.0);
    }

    #[tokio::test]
    async fn add_source_detects_cross_source_discrepancy() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path()).await;
        let now = Utc::now();
        let fp = linkage::fingerprint(&FingerprintInput {
            neighborhood: "Lozenets".to_string(),
            sqm: Some(85.0),
            rooms: Some(3),
            floor: Some(3),
            building_type: "brick".to_string(),
        });

        sink.add_source(&LinkageEntry {
            fingerprint: fp.clone(),
            record_id: "https://imot.bg/1".to_string(),
            source: "imot.bg".to_string(),
            source_url: "https://imot.bg/1".to_string(),
            price: 150_000.0,
            first_seen: now,
            last_seen: now,
        })
        .await
        .unwrap();

        sink.add_source(&LinkageEntry {
            fingerprint: fp.clone(),
            record_id: "https://imoti.net/1".to_string(),
            source: "imoti.net".to_string(),
            source_url: "https://imoti.net/1".to_string(),
            price: 140_000.0,
            first_seen: now,
            last_seen: now,
        })
        .await
        .unwrap();

        let entries = sink.linkage_entries_for(&fp).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(sink.metrics.price_discrepancies.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}

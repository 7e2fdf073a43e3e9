//! Checkpoint store (§4.4.6): atomic persistence for a named scrape
//! session, so a killed/restarted worker can resume from `pending` instead
//! of re-walking already-scraped URLs.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::{ResilienceError, ResilienceResult};
use crate::utils::atomic_write;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointData {
    pub scraped: HashSet<String>,
    pub pending: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One checkpoint per named session. `save()` batches writes every
/// `batch_size` calls unless `force` is set (§4.4.6); a signal handler
/// calls `save(..., force = true)` before exit.
pub struct Checkpoint {
    path: PathBuf,
    batch_size: u32,
    calls_since_flush: AtomicU32,
    write_lock: Mutex<()>,
}

impl Checkpoint {
    pub fn new(dir: impl Into<PathBuf>, session: &str, batch_size: u32) -> Self {
        let path = dir.into().join(format!("{session}.checkpoint.json"));
        Self { path, batch_size: batch_size.max(1), calls_since_flush: AtomicU32::new(0), write_lock: Mutex::new(()) }
    }

    pub async fn save(&self, scraped: &HashSet<String>, pending: &[String], force: bool) -> ResilienceResult<()> {
        let calls = self.calls_since_flush.fetch_add(1, Ordering::SeqCst) + 1;
        if !force && calls < self.batch_size {
            return Ok(());
        }
        self.flush(scraped, pending).await
    }

    async fn flush(&self, scraped: &HashSet<String>, pending: &[String]) -> ResilienceResult<()> {
        let _guard = self.write_lock.lock().await;
        let data = CheckpointData {
            scraped: scraped.clone(),
            pending: pending.to_vec(),
            updated_at: Some(Utc::now()),
        };
        let bytes = serde_json::to_vec_pretty(&data).map_err(|err| ResilienceError::CheckpointIo {
            session: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        atomic_write(&self.path, &bytes).await.map_err(|err| ResilienceError::CheckpointIo {
            session: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        self.calls_since_flush.store(0, Ordering::SeqCst);
        info!(path = %self.path.display(), scraped = data.scraped.len(), pending = data.pending.len(), "checkpoint flushed");
        Ok(())
    }

    pub async fn load(&self) -> ResilienceResult<CheckpointData> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| ResilienceError::CheckpointIo {
                session: self.path.display().to_string(),
                message: err.to_string(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointData::default()),
            Err(err) => Err(ResilienceError::CheckpointIo { session: self.path.display().to_string(), message: err.to_string() }),
        }
    }

    pub async fn clear(&self) -> ResilienceResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ResilienceError::CheckpointIo { session: self.path.display().to_string(), message: err.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forced_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "imot-bg", 10);

        let scraped: HashSet<String> = ["https://a".to_string(), "https://b".to_string()].into_iter().collect();
        let pending = vec!["https://c".to_string()];

        checkpoint.save(&scraped, &pending, true).await.unwrap();
        let loaded = checkpoint.load().await.unwrap();
        assert_eq!(loaded.scraped, scraped);
        assert_eq!(loaded.pending, pending);
    }

    #[tokio::test]
    async fn unforced_save_batches_until_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "sess", 3);
        let scraped = HashSet::new();

        checkpoint.save(&scraped, &["u1".to_string()], false).await.unwrap();
        checkpoint.save(&scraped, &["u2".to_string()], false).await.unwrap();
        assert!(checkpoint.load().await.unwrap().pending.is_empty(), "should not have flushed yet");

        checkpoint.save(&scraped, &["u3".to_string()], false).await.unwrap();
        assert_eq!(checkpoint.load().await.unwrap().pending, vec!["u3".to_string()]);
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "never-saved", 10);
        let loaded = checkpoint.load().await.unwrap();
        assert!(loaded.scraped.is_empty());
        assert!(loaded.pending.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "sess", 1);
        checkpoint.save(&HashSet::new(), &[], true).await.unwrap();
        checkpoint.clear().await.unwrap();
        assert!(checkpoint.load().await.unwrap().scraped.is_empty());
    }
}

//! Broker (§2, §6): a key-value + pub/sub store used for job progress
//! counters, the published-proxy freshness signal, and (optionally)
//! cross-worker resilience state.
//!
//! Represented as a `Broker` trait (conceptually Redis-equivalent: atomic
//! `INCR`, `SET` with TTL, hashes, pub/sub) with an in-process reference
//! implementation. A real Redis-backed implementation is a drop-in behind
//! the same trait and is out of scope to implement against a real Redis
//! wire protocol (§2).
//!
//! New module — the teacher talks to its own Postgres/SQLite directly and
//! has no broker abstraction. Shaped after `job_scheduling::JobQueue`'s
//! concurrency style (`Arc<RwLock<...>>`, TTL-bounded entries) since that is
//! the closest in-tree analogue to a shared KV store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::errors::{BrokerError, BrokerResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// KV + pub/sub + atomic-counter contract the orchestrator and pipelines
/// depend on (§2). All keys are namespaced strings (`proxy_refresh:{job_id}:*`,
/// `scraping:{job_id}:*`, §3) with a TTL applied at write time (§6: "all
/// keys set with 1-hour TTL").
#[async_trait]
pub trait Broker: Send + Sync {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BrokerResult<()>;
    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> BrokerResult<()>;
    /// Atomically increments the integer stored at `key` (creating it at 0
    /// first if absent) and returns the new value.
    async fn incr(&self, key: &str, ttl: Duration) -> BrokerResult<i64>;
    /// PING-style liveness probe (§4.1: "broker via PING (2s timeout)").
    async fn ping(&self) -> BrokerResult<()>;
    /// Publishes `payload` to `channel`; subscribers registered via
    /// `subscribe` before the publish receive it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> BrokerResult<()>;
    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// Typed convenience helpers layered over the byte-oriented `Broker` trait.
#[async_trait]
pub trait BrokerExt: Broker {
    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> BrokerResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes, ttl).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> BrokerResult<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl<T: Broker + ?Sized> BrokerExt for T {}

/// `Arc<RwLock<HashMap>>`-backed reference implementation (§10.4). TTL is
/// enforced lazily (checked on read/incr) rather than by a background
/// sweeper, since the only consumers are this process's own tasks.
#[derive(Debug)]
pub struct InMemoryBroker {
    store: RwLock<HashMap<String, Entry>>,
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self { store: RwLock::new(HashMap::new()), channels: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BrokerResult<()> {
        let expires_at = Some(Instant::now() + ttl);
        self.store.write().await.insert(key.to_string(), Entry { value: value.to_vec(), expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut store = self.store.write().await;
        match store.get(key) {
            Some(entry) if entry.is_expired(now) => {
                store.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> BrokerResult<()> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> BrokerResult<i64> {
        let now = Instant::now();
        let mut store = self.store.write().await;
        let current = match store.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                String::from_utf8_lossy(&entry.value).parse::<i64>().unwrap_or(0)
            }
            _ => 0,
        };
        let next = current + 1;
        store.insert(key.to_string(), Entry { value: next.to_string().into_bytes(), expires_at: Some(now + ttl) });
        Ok(next)
    }

    async fn ping(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> BrokerResult<()> {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(channel) {
            // No subscribers is not an error: publishing into the void is
            // normal (e.g. progress polling that nobody is watching yet).
            let _ = tx.send(payload.to_vec());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut channels = self.channels.write().await;
        let tx = channels.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel, "broker channel created");
            broadcast::channel(256).0
        });
        tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let broker = InMemoryBroker::new();
        broker.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(broker.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent() {
        let broker = InMemoryBroker::new();
        broker.set("k", b"v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(broker.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_starts_at_one_and_accumulates() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.incr("counter", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(broker.incr("counter", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(broker.incr("counter", Duration::from_secs(60)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn publish_before_subscribe_is_not_an_error_but_is_missed() {
        let broker = InMemoryBroker::new();
        broker.publish("chan", b"missed").await.unwrap();
        let mut rx = broker.subscribe("chan").await;
        broker.publish("chan", b"received").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"received".to_vec());
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Job {
            total: u32,
        }
        let broker = InMemoryBroker::new();
        broker.set_json("job:1", &Job { total: 3 }, Duration::from_secs(60)).await.unwrap();
        let loaded: Option<Job> = broker.get_json("job:1").await.unwrap();
        assert_eq!(loaded, Some(Job { total: 3 }));
    }
}

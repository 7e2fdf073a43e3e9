//! Health checks the orchestrator runs at `start()` and on its monitoring
//! cadence (§4.1): broker PING, worker-runtime control-plane ping, and an
//! optional TCP connect to a proxy-rotator's listen port.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::warn;

use crate::broker::Broker;
use crate::config::OrchestratorConfig;
use crate::errors::{BrokerError, CoreError, RuntimeError};
use crate::runtime::InMemoryTaskRuntime;

/// One health-checked dependency (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    Broker,
    Runtime,
    Rotator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub broker_ok: bool,
    pub runtime_ok: bool,
    /// `None` when no rotator address is configured — that check is simply
    /// skipped rather than counted as a failure.
    pub rotator_ok: Option<bool>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.broker_ok && self.runtime_ok && self.rotator_ok.unwrap_or(true)
    }

    /// Maps the first failing dependency to the `CoreError` variant that
    /// produces the §6 exit code for infrastructure unavailability.
    pub fn into_error(self) -> CoreError {
        if !self.broker_ok {
            return CoreError::Broker(BrokerError::Unreachable { message: "broker health check failed".to_string() });
        }
        if !self.runtime_ok {
            return CoreError::Runtime(RuntimeError::Unreachable);
        }
        if self.rotator_ok == Some(false) {
            return CoreError::internal("proxy rotator health check failed");
        }
        CoreError::internal("health check failed")
    }
}

/// Runs every configured health check concurrently and bounds each one by
/// its own timeout from `config` (§4.1: "broker via PING (2s timeout);
/// worker runtime via a control-plane ping (5s); rotator via TCP connect").
pub async fn check(broker: &dyn Broker, runtime: &InMemoryTaskRuntime, config: &OrchestratorConfig) -> HealthReport {
    let broker_ok = tokio::time::timeout(config.broker_ping_timeout, broker.ping()).await.map(|r| r.is_ok()).unwrap_or(false);
    if !broker_ok {
        warn!("broker health check failed or timed out");
    }

    let runtime_ok = tokio::time::timeout(config.runtime_ping_timeout, runtime.ping()).await.map(|r| r.is_ok()).unwrap_or(false);
    if !runtime_ok {
        warn!("worker runtime health check failed or timed out");
    }

    let rotator_ok = match &config.rotator_addr {
        Some(addr) => Some(check_rotator(addr, config.rotator_ping_timeout).await),
        None => None,
    };

    HealthReport { broker_ok, runtime_ok, rotator_ok }
}

async fn check_rotator(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            warn!(addr, error = %err, "rotator health check connect failed");
            false
        }
        Err(_) => {
            warn!(addr, "rotator health check timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    #[tokio::test]
    async fn in_memory_broker_and_runtime_are_healthy_by_default() {
        let broker = InMemoryBroker::new();
        let runtime = InMemoryTaskRuntime::new();
        let config = OrchestratorConfig::default();

        let report = check(&broker, &runtime, &config).await;
        assert!(report.all_healthy());
        assert_eq!(report.rotator_ok, None);
    }

    #[tokio::test]
    async fn shutdown_runtime_fails_its_health_check() {
        let broker = InMemoryBroker::new();
        let runtime = InMemoryTaskRuntime::new();
        runtime.shutdown();
        let config = OrchestratorConfig::default();

        let report = check(&broker, &runtime, &config).await;
        assert!(!report.runtime_ok);
        assert!(!report.all_healthy());
    }

    #[tokio::test]
    async fn unreachable_rotator_address_fails_its_check() {
        let broker = InMemoryBroker::new();
        let runtime = InMemoryTaskRuntime::new();
        let mut config = OrchestratorConfig::default();
        config.rotator_addr = Some("127.0.0.1:1".to_string());
        config.rotator_ping_timeout = Duration::from_millis(200);

        let report = check(&broker, &runtime, &config).await;
        assert_eq!(report.rotator_ok, Some(false));
        assert!(!report.all_healthy());
    }
}

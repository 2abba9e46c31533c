//! Dependency readiness gate.
//!
//! Blocks until an infrastructure dependency accepts TCP connections. Probes
//! back off exponentially and the whole wait is bounded, so an unreachable
//! dependency surfaces as `StackError::DependencyUnreachable` instead of a hang.

use crate::error::{Result, StackError};
use crate::observability::metrics;
use crate::types::Dependency;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

/// First delay between probes.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Upper bound on the delay between probes.
pub const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Default bound on a single dependency wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// One reachability check against an address.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Return `true` if the address accepts a connection right now.
    async fn probe(&self, addr: &str) -> bool;
}

/// Probe that dials a TCP connection and immediately drops it.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    dial_timeout: Duration,
}

impl TcpProbe {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, addr: &str) -> bool {
        matches!(tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
    }
}

/// Waits for infrastructure dependencies to become reachable.
#[derive(Clone)]
pub struct ReadinessGate {
    probe: Arc<dyn ReachabilityProbe>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ReadinessGate {
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { probe, initial_backoff: INITIAL_BACKOFF, max_backoff: MAX_BACKOFF }
    }

    /// Override the backoff schedule (tests use millisecond values).
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Block until `addr` accepts connections or `timeout` elapses.
    #[instrument(skip(self), fields(dependency = %dependency))]
    pub async fn await_reachable(
        &self,
        dependency: Dependency,
        addr: &str,
        timeout: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        let poll = async {
            let mut delay = self.initial_backoff;
            let mut attempts: u32 = 0;
            loop {
                attempts += 1;
                metrics::record_probe(dependency.as_str());
                if self.probe.probe(addr).await {
                    return attempts;
                }
                debug!(addr = %addr, attempts, next = ?delay, "Dependency not reachable yet");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.max_backoff);
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(attempts) => {
                let waited = started.elapsed();
                metrics::record_readiness_wait(dependency.as_str(), waited.as_secs_f64());
                info!(addr = %addr, attempts, waited = ?waited, "Dependency reachable");
                Ok(())
            }
            Err(_) => Err(StackError::DependencyUnreachable {
                name: dependency.to_string(),
                addr: addr.to_string(),
                waited: started.elapsed(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Probe that fails a fixed number of times, then succeeds.
    struct FlakyProbe {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReachabilityProbe for FlakyProbe {
        async fn probe(&self, _addr: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.failures
        }
    }

    fn gate(probe: Arc<dyn ReachabilityProbe>) -> ReadinessGate {
        ReadinessGate::new(probe).with_backoff(Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn test_waits_until_reachable() {
        let probe = Arc::new(FlakyProbe { failures: 3, calls: AtomicU32::new(0) });
        gate(probe.clone())
            .await_reachable(Dependency::Database, "127.0.0.1:5432", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let probe = Arc::new(FlakyProbe { failures: u32::MAX, calls: AtomicU32::new(0) });
        let err = gate(probe)
            .await_reachable(Dependency::Cache, "127.0.0.1:6379", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::DependencyUnreachable { ref name, .. } if name == "cache"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(TcpProbe::default().probe(&addr).await);

        drop(listener);
        assert!(!TcpProbe::default().probe(&addr).await);
    }
}

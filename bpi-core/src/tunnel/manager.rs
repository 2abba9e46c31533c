//! Tunnel lifecycle: `Idle -> Connecting -> Connected -> ShuttingDown -> Closed`.

use super::{FailureCallback, TunnelClient, TunnelDescriptor};
use crate::error::{Result, StackError};
use futures_util::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Bound on waiting for every requested tunnel to be assigned an address.
pub const ASSIGNMENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Connecting,
    Connected,
    ShuttingDown,
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Idle => "idle",
            TunnelState::Connecting => "connecting",
            TunnelState::Connected => "connected",
            TunnelState::ShuttingDown => "shutting down",
            TunnelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A subject and the public address it was assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    pub subject: String,
    pub remote_addr: String,
}

/// Owns the tunnel client and the state machine around it.
pub struct TunnelManager {
    client: Arc<dyn TunnelClient>,
    state: watch::Sender<TunnelState>,
    assignment_timeout: Duration,
}

impl TunnelManager {
    pub fn new(client: Arc<dyn TunnelClient>) -> Self {
        let (state, _) = watch::channel(TunnelState::Idle);
        Self {
            client,
            state,
            assignment_timeout: ASSIGNMENT_TIMEOUT,
        }
    }

    pub fn with_assignment_timeout(mut self, timeout: Duration) -> Self {
        self.assignment_timeout = timeout;
        self
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    /// Register, connect and wait for every descriptor.
    ///
    /// With no descriptors the manager stays `Idle` and nothing is dialed.
    #[instrument(skip_all, fields(tunnels = descriptors.len()))]
    pub async fn establish(
        &self,
        descriptors: Vec<TunnelDescriptor>,
        on_failure: FailureCallback,
    ) -> Result<Vec<TunnelEndpoint>> {
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }
        if self.state() != TunnelState::Idle {
            return Err(StackError::Internal(format!(
                "tunnels cannot be established while {}",
                self.state()
            )));
        }

        self.state.send_replace(TunnelState::Connecting);
        self.client.connect().await?;

        let mut registered = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            registered.push(self.client.factory(descriptor, Arc::clone(&on_failure)).await);
        }

        self.client.connect_all().await?;

        let started = Instant::now();
        let waits = registered.iter().map(|t| t.assigned());
        let addrs = match tokio::time::timeout(self.assignment_timeout, join_all(waits)).await {
            Ok(addrs) => addrs,
            Err(_) => {
                let pending: Vec<_> = registered
                    .iter()
                    .filter(|t| t.remote_addr().is_none())
                    .map(|t| t.subject().to_string())
                    .collect();
                return Err(StackError::TunnelTimeout {
                    pending: pending.join(", "),
                    waited: started.elapsed(),
                });
            }
        };

        let endpoints: Vec<_> = registered
            .iter()
            .zip(addrs)
            .map(|(t, remote_addr)| TunnelEndpoint { subject: t.subject().to_string(), remote_addr })
            .collect();

        for endpoint in &endpoints {
            info!(subject = %endpoint.subject, remote = %endpoint.remote_addr, "Tunnel assigned");
        }
        self.state.send_replace(TunnelState::Connected);
        Ok(endpoints)
    }

    /// Close every tunnel. Repeated calls after the first are no-ops.
    pub async fn close(&self) -> Result<()> {
        let mut previous = TunnelState::Idle;
        self.state.send_modify(|state| {
            previous = *state;
            *state = match *state {
                TunnelState::Idle => TunnelState::Closed,
                TunnelState::Connecting | TunnelState::Connected => TunnelState::ShuttingDown,
                other => other,
            };
        });
        if !matches!(previous, TunnelState::Connecting | TunnelState::Connected) {
            return Ok(());
        }

        let result = self.client.close().await;
        if let Err(e) = &result {
            warn!(error = %e, "Tunnel client did not close cleanly");
        }
        self.state.send_replace(TunnelState::Closed);
        info!("Tunnels closed");
        result
    }
}

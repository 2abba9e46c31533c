//! Outbound tunnels exposing stack ports to the public internet.
//!
//! A `TunnelClient` owns one control connection to a tunnel broker and any
//! number of registered tunnels. Each `Tunnel` learns its public address
//! asynchronously; `TunnelManager` registers the requested exposures, connects
//! them together and waits (bounded) until every address is assigned.

use crate::error::Result;
use crate::types::StackOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

mod broker;
mod manager;

pub use broker::BrokerTunnelClient;
pub use manager::{TunnelEndpoint, TunnelManager, TunnelState, ASSIGNMENT_TIMEOUT};

/// Callback invoked with `(subject, reason)` when a tunnel fails asynchronously.
pub type FailureCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Public protocol a tunnel is exposed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelScheme {
    Https,
    Tcp,
    Wss,
}

impl fmt::Display for TunnelScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelScheme::Https => write!(f, "https"),
            TunnelScheme::Tcp => write!(f, "tcp"),
            TunnelScheme::Wss => write!(f, "wss"),
        }
    }
}

/// What to expose and how.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelDescriptor {
    /// Logical subject, e.g. `<org>-api`
    pub subject: String,

    /// Local target (`host:port`)
    pub local_addr: String,

    pub scheme: TunnelScheme,

    /// Bearer credential presented to the broker
    pub token: String,
}

impl fmt::Debug for TunnelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDescriptor")
            .field("subject", &self.subject)
            .field("local_addr", &self.local_addr)
            .field("scheme", &self.scheme)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TunnelDescriptor {
    /// Descriptors for every exposure requested in `options`.
    pub fn for_stack(options: &StackOptions, token: &str) -> Vec<Self> {
        let org = &options.organization.organization_id;
        let mut descriptors = Vec::new();
        let mut push = |suffix: &str, port: u16, scheme: TunnelScheme| {
            descriptors.push(Self {
                subject: format!("{}-{}", org, suffix),
                local_addr: format!("127.0.0.1:{}", port),
                scheme,
                token: token.to_string(),
            });
        };

        if options.exposure.api {
            push("api", options.api.port, TunnelScheme::Https);
        }
        if options.exposure.messaging {
            push("nats", options.messaging.port, TunnelScheme::Tcp);
        }
        if options.exposure.websocket {
            push("nats-ws", options.messaging_ws_port, TunnelScheme::Wss);
        }
        descriptors
    }
}

/// A registered tunnel whose public address is filled in by the client.
#[derive(Debug)]
pub struct Tunnel {
    descriptor: TunnelDescriptor,
    remote_addr: watch::Sender<Option<String>>,
}

impl Tunnel {
    pub fn new(descriptor: TunnelDescriptor) -> Self {
        let (remote_addr, _) = watch::channel(None);
        Self { descriptor, remote_addr }
    }

    pub fn descriptor(&self) -> &TunnelDescriptor {
        &self.descriptor
    }

    pub fn subject(&self) -> &str {
        &self.descriptor.subject
    }

    /// Assigned public address, once known.
    pub fn remote_addr(&self) -> Option<String> {
        self.remote_addr.borrow().clone()
    }

    /// Record the public address. Empty addresses are ignored.
    pub fn set_remote_addr(&self, addr: impl Into<String>) {
        let addr = addr.into();
        if !addr.is_empty() {
            self.remote_addr.send_replace(Some(addr));
        }
    }

    /// Wait until the public address has been assigned.
    pub async fn assigned(&self) -> String {
        let mut rx = self.remote_addr.subscribe();
        let addr = match rx.wait_for(Option::is_some).await {
            Ok(addr) => addr.clone().unwrap_or_default(),
            // The sender lives as long as `self`.
            Err(_) => String::new(),
        };
        addr
    }
}

/// Tunnel client contract.
///
/// Tunnels must be registered through `factory` before `connect_all`.
#[async_trait]
pub trait TunnelClient: Send + Sync {
    /// Open the control connection.
    async fn connect(&self) -> Result<()>;

    /// Register a tunnel; `on_failure` fires if it later fails asynchronously.
    async fn factory(&self, descriptor: TunnelDescriptor, on_failure: FailureCallback) -> Arc<Tunnel>;

    /// Request every registered tunnel from the broker.
    async fn connect_all(&self) -> Result<()>;

    /// Tear down every tunnel and the control connection.
    async fn close(&self) -> Result<()>;
}

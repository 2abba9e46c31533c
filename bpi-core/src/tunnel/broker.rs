//! WebSocket tunnel broker client.
//!
//! One control socket carries JSON messages in both directions:
//!
//! - `open` (out): request a public address for a subject
//! - `assigned` (in): the subject's public address
//! - `error` (in): the broker gave up on a subject
//! - `connection` (in): a public client connected; dial `dial` and pipe its
//!   binary frames to the subject's local target
//!
//! Losing the control socket fails every registered tunnel.

use super::{FailureCallback, Tunnel, TunnelClient, TunnelDescriptor, TunnelScheme};
use crate::error::{Result, StackError};
use crate::observability::metrics;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PIPE_BUFFER: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Open { subject: String, scheme: TunnelScheme, token: String },
    Assigned { subject: String, remote_addr: String },
    Error { subject: String, message: String },
    Connection { subject: String, dial: String },
}

struct Registration {
    tunnel: Arc<Tunnel>,
    on_failure: FailureCallback,
    opened: bool,
}

type Registry = Arc<Mutex<HashMap<String, Registration>>>;

/// Tunnel client speaking the broker's WebSocket control protocol.
pub struct BrokerTunnelClient {
    url: String,
    registry: Registry,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closing: CancellationToken,
}

impl BrokerTunnelClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            registry: Arc::new(Mutex::new(HashMap::new())),
            outbound: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            closing: CancellationToken::new(),
        }
    }

    async fn send(&self, message: &ControlMessage) -> Result<()> {
        let text = serde_json::to_string(message).map_err(StackError::internal)?;
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().ok_or_else(|| StackError::TunnelFailed {
            subject: "broker".to_string(),
            reason: "control connection not open".to_string(),
        })?;
        tx.send(Message::Text(text)).map_err(|_| StackError::TunnelFailed {
            subject: "broker".to_string(),
            reason: "control connection closed".to_string(),
        })
    }
}

async fn fail(registry: &Registry, subject: &str, reason: &str) {
    let callback = registry.lock().await.get(subject).map(|r| Arc::clone(&r.on_failure));
    if let Some(callback) = callback {
        metrics::record_tunnel_failure(subject);
        warn!(subject = %subject, reason = %reason, "Tunnel failed");
        callback(subject, reason);
    }
}

async fn fail_all(registry: &Registry, reason: &str) {
    let subjects: Vec<String> = registry.lock().await.keys().cloned().collect();
    for subject in subjects {
        fail(registry, &subject, reason).await;
    }
}

async fn handle_control(
    registry: &Registry,
    message: ControlMessage,
    closing: &CancellationToken,
) {
    match message {
        ControlMessage::Assigned { subject, remote_addr } => {
            match registry.lock().await.get(&subject) {
                Some(registration) => registration.tunnel.set_remote_addr(remote_addr),
                None => debug!(subject = %subject, "Address for unknown tunnel"),
            }
        }
        ControlMessage::Error { subject, message } => fail(registry, &subject, &message).await,
        ControlMessage::Connection { subject, dial } => {
            let local_addr = registry
                .lock()
                .await
                .get(&subject)
                .map(|r| r.tunnel.descriptor().local_addr.clone());
            let Some(local_addr) = local_addr else {
                debug!(subject = %subject, "Connection for unknown tunnel");
                return;
            };
            let cancel = closing.child_token();
            tokio::spawn(async move {
                if let Err(e) = pipe(&subject, &dial, &local_addr, cancel).await {
                    debug!(subject = %subject, error = %e, "Tunnel connection ended with error");
                }
            });
        }
        ControlMessage::Open { .. } => debug!("Ignoring echoed open request"),
    }
}

/// Pipe one public connection to the local target until either side closes.
async fn pipe(subject: &str, dial: &str, local_addr: &str, cancel: CancellationToken) -> Result<()> {
    let failed = |reason: String| StackError::TunnelFailed { subject: subject.to_string(), reason };

    let (socket, _) = connect_async(dial).await.map_err(|e| failed(e.to_string()))?;
    let local = TcpStream::connect(local_addr)
        .await
        .map_err(|e| failed(format!("local target {}: {}", local_addr, e)))?;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut tcp_rx, mut tcp_tx) = local.into_split();
    let mut buf = vec![0u8; PIPE_BUFFER];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    tcp_tx.write_all(&data).await.map_err(|e| failed(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(failed(e.to_string())),
            },
            read = tcp_rx.read(&mut buf) => match read.map_err(|e| failed(e.to_string()))? {
                0 => break,
                n => ws_tx
                    .send(Message::Binary(buf[..n].to_vec()))
                    .await
                    .map_err(|e| failed(e.to_string()))?,
            },
        }
    }

    let _ = ws_tx.close().await;
    let _ = tcp_tx.shutdown().await;
    Ok(())
}

#[async_trait]
impl TunnelClient for BrokerTunnelClient {
    async fn connect(&self) -> Result<()> {
        let (socket, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            StackError::TunnelFailed { subject: "broker".to_string(), reason: e.to_string() }
        })?;
        info!(url = %self.url, "Connected to tunnel broker");

        let (mut write, mut read) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let registry = Arc::clone(&self.registry);
        let closing = self.closing.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ControlMessage>(&text) {
                        Ok(message) => handle_control(&registry, message, &closing).await,
                        Err(e) => debug!("Failed to parse control message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Tunnel broker receive error: {}", e);
                        break;
                    }
                }
            }
            if !closing.is_cancelled() {
                fail_all(&registry, "tunnel broker connection lost").await;
            }
        });

        *self.outbound.lock().await = Some(tx);
        self.tasks.lock().await.extend([writer, reader]);
        Ok(())
    }

    async fn factory(&self, descriptor: TunnelDescriptor, on_failure: FailureCallback) -> Arc<Tunnel> {
        let subject = descriptor.subject.clone();
        let tunnel = Arc::new(Tunnel::new(descriptor));
        self.registry.lock().await.insert(
            subject,
            Registration { tunnel: Arc::clone(&tunnel), on_failure, opened: false },
        );
        tunnel
    }

    async fn connect_all(&self) -> Result<()> {
        let pending: Vec<(String, ControlMessage)> = {
            let registry = self.registry.lock().await;
            registry
                .iter()
                .filter(|(_, r)| !r.opened)
                .map(|(subject, r)| {
                    let d = r.tunnel.descriptor();
                    let open = ControlMessage::Open {
                        subject: d.subject.clone(),
                        scheme: d.scheme,
                        token: d.token.clone(),
                    };
                    (subject.clone(), open)
                })
                .collect()
        };

        // A registration counts as opened only once its request went out.
        for (subject, message) in &pending {
            self.send(message).await?;
            if let Some(registration) = self.registry.lock().await.get_mut(subject) {
                registration.opened = true;
            }
        }
        debug!(opened = pending.len(), "Requested tunnels");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closing.cancel();
        if let Some(tx) = self.outbound.lock().await.take() {
            let _ = tx.send(Message::Close(None));
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.registry.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor(subject: &str) -> TunnelDescriptor {
        TunnelDescriptor {
            subject: subject.to_string(),
            local_addr: "127.0.0.1:8080".to_string(),
            scheme: TunnelScheme::Https,
            token: "t".to_string(),
        }
    }

    #[test]
    fn test_control_message_wire_format() {
        let open = ControlMessage::Open {
            subject: "org-1-api".to_string(),
            scheme: TunnelScheme::Https,
            token: "t".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&open).unwrap(),
            r#"{"type":"open","subject":"org-1-api","scheme":"https","token":"t"}"#
        );

        let assigned: ControlMessage = serde_json::from_str(
            r#"{"type":"assigned","subject":"org-1-api","remote_addr":"https://x.example"}"#,
        )
        .unwrap();
        assert!(matches!(assigned, ControlMessage::Assigned { .. }));
    }

    #[tokio::test]
    async fn test_assigned_and_error_dispatch() {
        let client = BrokerTunnelClient::new("ws://127.0.0.1:1");
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let on_failure: FailureCallback = Arc::new(move |_: &str, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let tunnel = client.factory(descriptor("org-1-api"), on_failure).await;
        let closing = CancellationToken::new();

        handle_control(
            &client.registry,
            ControlMessage::Assigned {
                subject: "org-1-api".to_string(),
                remote_addr: "https://x.example".to_string(),
            },
            &closing,
        )
        .await;
        assert_eq!(tunnel.remote_addr().as_deref(), Some("https://x.example"));

        handle_control(
            &client.registry,
            ControlMessage::Error { subject: "org-1-api".to_string(), message: "quota".to_string() },
            &closing,
        )
        .await;
        fail_all(&client.registry, "lost").await;
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_all_requires_connection() {
        let client = BrokerTunnelClient::new("ws://127.0.0.1:1");
        client.factory(descriptor("org-1-api"), Arc::new(|_: &str, _: &str| {})).await;
        assert!(client.connect_all().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let client = BrokerTunnelClient::new("ws://127.0.0.1:1");
        client.factory(descriptor("org-1-api"), Arc::new(|_: &str, _: &str| {})).await;
        assert!(client.connect_all().await.is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        *client.outbound.lock().await = Some(tx);
        client.connect_all().await.unwrap();

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected an open request");
        };
        let sent: ControlMessage = serde_json::from_str(&text).unwrap();
        assert!(matches!(sent, ControlMessage::Open { ref subject, .. } if subject == "org-1-api"));

        // Opened registrations are not requested twice
        client.connect_all().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}

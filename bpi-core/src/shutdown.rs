//! Exactly-once shutdown coordination.
//!
//! Shutdown can be requested by an OS signal or by an asynchronous tunnel
//! failure, possibly both at once, or by a fatal startup error. Every
//! request funnels through one `OnceCell`; the first one runs the cleanup,
//! later and concurrent ones wait for it to finish and do nothing else.

use crate::stack::StackOrchestrator;
use crate::tunnel::TunnelManager;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the stack is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Operator signal or a tunnel lost while running
    Graceful,
    /// Startup failed; containers stay up for inspection unless pruning
    Fatal,
}

/// Cleanup run by the winning request.
pub type CleanupFn = Arc<dyn Fn(ShutdownKind) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ShutdownCoordinator {
    done: OnceCell<()>,
    reason: OnceLock<String>,
    token: CancellationToken,
    cleanup: CleanupFn,
}

impl ShutdownCoordinator {
    pub fn new(cleanup: CleanupFn) -> Self {
        Self {
            done: OnceCell::new(),
            reason: OnceLock::new(),
            token: CancellationToken::new(),
            cleanup,
        }
    }

    /// Request shutdown. Returns `true` only for the call that ran cleanup.
    ///
    /// Every caller returns after cleanup has completed, and the shared
    /// token is cancelled by then.
    pub async fn trigger(&self, reason: &str) -> bool {
        self.shutdown(ShutdownKind::Graceful, reason).await
    }

    /// Like `trigger`, for an unrecoverable startup error.
    pub async fn abort(&self, reason: &str) -> bool {
        self.shutdown(ShutdownKind::Fatal, reason).await
    }

    async fn shutdown(&self, kind: ShutdownKind, reason: &str) -> bool {
        let performed = AtomicBool::new(false);
        let flag = &performed;
        self.done
            .get_or_init(|| async move {
                flag.store(true, Ordering::SeqCst);
                let _ = self.reason.set(reason.to_string());
                info!(reason = %reason, ?kind, "Shutting down");
                (self.cleanup)(kind).await;
            })
            .await;
        self.token.cancel();

        let performed = performed.load(Ordering::SeqCst);
        if !performed {
            info!(reason = %reason, "Shutdown already performed");
        }
        performed
    }

    /// Token cancelled once shutdown has completed.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Reason given by the trigger that ran cleanup.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

/// Cleanup for a running stack: close tunnels, then stop or prune containers.
///
/// A fatal shutdown only closes tunnels, unless `prune` asks for the stack to
/// be removed on exit.
pub fn stack_cleanup(
    orchestrator: StackOrchestrator,
    tunnels: Option<Arc<TunnelManager>>,
    stack_name: String,
    prune: bool,
) -> CleanupFn {
    Arc::new(move |kind: ShutdownKind| {
        let orchestrator = orchestrator.clone();
        let tunnels = tunnels.clone();
        let stack_name = stack_name.clone();
        Box::pin(async move {
            if let Some(tunnels) = tunnels {
                if let Err(e) = tunnels.close().await {
                    warn!(error = %e, "Failed to close tunnels");
                }
            }

            if kind == ShutdownKind::Fatal && !prune {
                info!(stack = %stack_name, "Leaving containers in place");
                return;
            }

            let result = if prune {
                orchestrator.prune(&stack_name, true).await
            } else {
                orchestrator.stop(&stack_name).await
            };
            match result {
                Ok(containers) => {
                    info!(stack = %stack_name, containers = containers.len(), prune, "Stack cleaned up");
                }
                Err(e) => warn!(stack = %stack_name, error = %e, "Stack cleanup incomplete"),
            }
        })
    })
}

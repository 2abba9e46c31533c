//! OS signal handling.

use tokio::sync::broadcast;
use tracing::{error, info};

pub const SIGINT: &str = "SIGINT";
pub const SIGTERM: &str = "SIGTERM";

/// Whether a shutdown reason came from an OS signal.
pub fn is_signal(reason: &str) -> bool {
    reason == SIGINT || reason == SIGTERM
}

/// Create a receiver that gets the signal name when SIGINT or SIGTERM arrives.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still works.
pub fn shutdown_signal() -> broadcast::Receiver<&'static str> {
    let (tx, rx) = broadcast::channel(1);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let name = tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C)");
                SIGINT
            }
            _ = terminate => {
                info!("Received SIGTERM");
                SIGTERM
            }
        };

        let _ = tx.send(name);
    });

    rx
}

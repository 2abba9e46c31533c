//! Observability infrastructure: tracing, metrics, health checks.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod health;
pub mod metrics;

/// Address for the Prometheus exporter, if one was requested.
/// Set BPI_METRICS_ADDR=0.0.0.0:9464 (for example) to enable.
fn metrics_addr() -> Option<SocketAddr> {
    std::env::var("BPI_METRICS_ADDR").ok().and_then(|addr| addr.parse().ok())
}

/// Initialize the global observability infrastructure.
///
/// This must be called once at process startup before any other operations.
/// `default_level` applies when `RUST_LOG` is not set.
pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    if let Some(addr) = metrics_addr() {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        tracing::info!("Prometheus exporter listening on {}", addr);
    } else {
        tracing::debug!("Metrics exporter disabled (set BPI_METRICS_ADDR to enable)");
    }

    metrics::register_core_metrics();

    Ok(())
}

//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Container metrics
    describe_counter!("bpi_images_pulled_total", "Total number of images pulled (by image)");
    describe_counter!("bpi_containers_started_total", "Total container starts (by service)");
    describe_counter!(
        "bpi_containers_reused_total",
        "Container starts that reused an existing container (by service)"
    );

    // Readiness metrics
    describe_counter!("bpi_readiness_probes_total", "Readiness probe attempts (by dependency)");
    describe_histogram!(
        "bpi_readiness_wait_seconds",
        "Time spent waiting for a dependency to accept connections"
    );

    // Tunnel metrics
    describe_counter!("bpi_tunnel_failures_total", "Asynchronous tunnel failures (by subject)");

    // Credential metrics
    describe_counter!("bpi_keys_created_total", "Keys created in the vault (by spec)");
    describe_counter!("bpi_invitations_vended_total", "Invitation tokens signed");
}

pub fn record_image_pulled(image: &str) {
    counter!("bpi_images_pulled_total", "image" => image.to_string()).increment(1);
}

pub fn record_container_started(service: &str, reused: bool) {
    counter!("bpi_containers_started_total", "service" => service.to_string()).increment(1);
    if reused {
        counter!("bpi_containers_reused_total", "service" => service.to_string()).increment(1);
    }
}

pub fn record_probe(dependency: &str) {
    counter!("bpi_readiness_probes_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_readiness_wait(dependency: &str, duration_secs: f64) {
    histogram!("bpi_readiness_wait_seconds", "dependency" => dependency.to_string())
        .record(duration_secs);
}

pub fn record_tunnel_failure(subject: &str) {
    counter!("bpi_tunnel_failures_total", "subject" => subject.to_string()).increment(1);
}

pub fn record_key_created(spec: &str) {
    counter!("bpi_keys_created_total", "spec" => spec.to_string()).increment(1);
}

pub fn record_invitation_vended() {
    counter!("bpi_invitations_vended_total").increment(1);
}

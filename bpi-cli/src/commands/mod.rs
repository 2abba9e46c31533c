//! CLI command implementations

pub mod accept;
pub mod invite;
pub mod logs;
pub mod prune;
pub mod ps;
pub mod start;
pub mod stop;
pub mod subject_account;

use anyhow::{Context, Result};
use bpi_core::readiness::{ReadinessGate, TcpProbe};
use bpi_core::{DockerRuntime, StackOrchestrator};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Orchestrator over the local Docker daemon.
pub(crate) fn orchestrator() -> Result<StackOrchestrator> {
    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let gate = ReadinessGate::new(Arc::new(TcpProbe::default()));
    Ok(StackOrchestrator::new(Arc::new(runtime), gate))
}

pub(crate) fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

pub(crate) fn colorize_state(state: &str) -> String {
    match state {
        "running" => state.green().to_string(),
        "exited" | "dead" => state.red().to_string(),
        "restarting" | "paused" => state.yellow().to_string(),
        _ => state.to_string(),
    }
}

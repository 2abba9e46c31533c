//! `bpi stop` command

use super::{orchestrator, spinner};
use anyhow::{Context, Result};
use colored::Colorize;

/// Stop every container of the stack, keeping containers and volumes.
pub async fn stop(stack_name: &str) -> Result<()> {
    let orchestrator = orchestrator()?;

    let spinner = spinner(format!("Stopping stack '{}'...", stack_name))?;
    let result = orchestrator.stop(stack_name).await;
    spinner.finish_and_clear();

    let stopped = result.with_context(|| format!("Failed to stop stack '{}'", stack_name))?;
    if stopped.is_empty() {
        println!("No containers found for stack '{}'", stack_name);
        return Ok(());
    }

    for name in &stopped {
        println!("  {} {}", "•".dimmed(), name);
    }
    println!("{} Stack stopped: {}", "✓".green().bold(), stack_name.bold());
    Ok(())
}

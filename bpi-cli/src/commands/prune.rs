//! `bpi prune` command

use super::{orchestrator, spinner};
use anyhow::{Context, Result};
use colored::Colorize;

/// Remove every container of the stack, optionally with volumes and network.
pub async fn prune(stack_name: &str, volumes: bool) -> Result<()> {
    let orchestrator = orchestrator()?;

    let spinner = spinner(format!("Pruning stack '{}'...", stack_name))?;
    let result = orchestrator.prune(stack_name, volumes).await;
    spinner.finish_and_clear();

    let removed = result.with_context(|| format!("Failed to prune stack '{}'", stack_name))?;
    for name in &removed {
        println!("  {} {}", "•".dimmed(), name);
    }

    if removed.is_empty() && !volumes {
        println!("No containers found for stack '{}'", stack_name);
    } else {
        println!("{} Stack pruned: {}", "✓".green().bold(), stack_name.bold());
    }
    Ok(())
}

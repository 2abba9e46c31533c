//! `bpi logs` command - multiplexed stack logs

use super::orchestrator;
use anyhow::Result;
use colored::Colorize;
use futures_util::StreamExt;

/// Stream logs from every container in the stack, prefixed with the container name
pub async fn logs(stack_name: &str, follow: bool, tail: Option<u32>) -> Result<()> {
    let mut stream = orchestrator()?.logs(stack_name, follow, tail).await?;

    while let Some(entry) = stream.next().await {
        match entry {
            Ok(line) => {
                println!("{} {} {}", line.container.cyan(), "|".dimmed(), line.line);
            }
            Err(e) => {
                eprintln!("Error receiving log: {}", e);
                break;
            }
        }
    }

    Ok(())
}

//! `bpi ps` command

use super::{colorize_state, orchestrator};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "STATE")]
    state: String,
}

/// List the stack's containers
pub async fn ps(stack_name: &str) -> Result<()> {
    let containers = orchestrator()?.ps(stack_name).await?;

    if containers.is_empty() {
        println!("No containers for stack '{}'", stack_name);
        return Ok(());
    }

    let rows: Vec<ContainerRow> = containers
        .into_iter()
        .map(|c| ContainerRow {
            id: c.id[..12.min(c.id.len())].to_string(),
            name: c.name,
            image: c.image,
            state: colorize_state(&c.state),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{}", table);

    Ok(())
}

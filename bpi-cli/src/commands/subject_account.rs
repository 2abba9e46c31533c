//! `bpi subject-account` command

use anyhow::{bail, Result};
use bpi_core::SubjectAccountId;
use colored::Colorize;

/// Print the subject account id of an organization in a workgroup.
pub fn subject_account(organization_id: &str, workgroup_id: &str, check: Option<&str>) -> Result<()> {
    let id = SubjectAccountId::derive(organization_id, workgroup_id);
    println!("{}", id);

    if let Some(expected) = check {
        if expected.trim() != id.as_str() {
            bail!(
                "Subject account {} does not belong to organization {} in workgroup {}",
                expected,
                organization_id,
                workgroup_id
            );
        }
        eprintln!("{} Subject account matches", "✓".green().bold());
    }
    Ok(())
}

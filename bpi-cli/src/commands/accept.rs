//! `bpi accept` command

use anyhow::{Context, Result};
use bpi_core::InvitationVerifier;
use clap::Args;
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct AcceptArgs {
    /// Compact invitation token, or "-" to read it from stdin
    pub token: String,

    /// Invitor public key (PEM); repeat for several, most recent last
    #[arg(long = "public-key", value_name = "PEM", required = true)]
    pub public_keys: Vec<PathBuf>,

    /// Invitee organization id, to print the participant settings
    #[arg(long, env = "BPI_ORGANIZATION_ID")]
    pub organization: Option<String>,

    /// Print the verified claims as JSON
    #[arg(long)]
    pub json: bool,
}

/// Verify an invitation against the invitor's published keys.
pub fn accept(args: AcceptArgs) -> Result<()> {
    let mut verifier = InvitationVerifier::new();
    for path in &args.public_keys {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read public key {}", path.display()))?;
        let fingerprint = verifier
            .trust_pem(&pem)
            .with_context(|| format!("Invalid public key {}", path.display()))?;
        debug!(path = %path.display(), fingerprint = %fingerprint, "Trusted key");
    }

    let token = if args.token == "-" {
        let mut token = String::new();
        std::io::stdin().read_to_string(&mut token).context("Failed to read token from stdin")?;
        token
    } else {
        args.token.clone()
    };

    let verified = verifier.verify(&token).context("Invitation rejected")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verified.claims)?);
        return Ok(());
    }

    let params = verified.claims.params();
    println!("{} Invitation verified", "✓".green().bold());
    println!("  Invitor:          {}", verified.invitor_organization_id);
    println!("  Invitee:          {}", verified.claims.sub);
    println!("  Workgroup:        {}", params.workgroup_id);
    println!(
        "  Registry:         {}",
        params.registry_contract_address.as_deref().unwrap_or("-")
    );
    println!("  Signing key:      {}", verified.fingerprint);
    if !verified.kid_matched {
        println!("  {}", "Key selected by fallback; no key matched the token's kid".yellow());
    }

    if let Some(organization) = &args.organization {
        let context = verified.participant_context(organization);
        println!("  Subject account:  {}", context.subject_account_id().to_string().cyan());

        let mut join = format!(
            "bpi start --organization {} --workgroup {} --separation-degree {}",
            organization, context.workgroup_id, context.operator_separation_degree
        );
        if let Some(registry) = &context.registry_contract_address {
            join.push_str(&format!(" --registry-contract {}", registry));
        }
        println!();
        println!("{} {}", "→".cyan().bold(), join);
    }

    Ok(())
}

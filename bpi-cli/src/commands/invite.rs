//! `bpi invite` command

use anyhow::{Context, Result};
use bpi_core::invite::{InvitationParams, MessagingPermissions, SubjectPermissions};
use bpi_core::platform::{InvitationRequest, PlatformApi, PlatformEndpoints};
use bpi_core::{
    ports, Config, HttpPlatformClient, InvitationClaims, InvitationVendor, KeyProvisioner,
    SubjectAccountId,
};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct InviteArgs {
    /// Invitor organization id
    #[arg(long, env = "BPI_ORGANIZATION_ID")]
    pub organization: String,

    /// Workgroup the invitee is invited into
    #[arg(long, env = "BPI_WORKGROUP_ID")]
    pub workgroup: String,

    /// Invitee email
    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub first_name: Option<String>,

    #[arg(long)]
    pub last_name: Option<String>,

    /// Published messaging endpoint of the invitor (token audience)
    #[arg(long)]
    pub messaging_endpoint: String,

    /// Invitor organization's public signing address
    #[arg(long)]
    pub organization_address: Option<String>,

    /// Workgroup registry contract address
    #[arg(long)]
    pub registry_contract: Option<String>,

    /// Subjects the invitee may publish to
    #[arg(long)]
    pub publish_allow: Vec<String>,

    /// Subjects the invitee may not publish to
    #[arg(long)]
    pub publish_deny: Vec<String>,

    /// Subjects the invitee may subscribe to
    #[arg(long)]
    pub subscribe_allow: Vec<String>,

    /// Subjects the invitee may not subscribe to
    #[arg(long)]
    pub subscribe_deny: Vec<String>,

    /// Reply subjects the invitee may respond on
    #[arg(long)]
    pub responses_allow: Vec<String>,

    /// Reply subjects the invitee may not respond on
    #[arg(long)]
    pub responses_deny: Vec<String>,

    /// Print the signed token without submitting it for delivery
    #[arg(long)]
    pub no_deliver: bool,
}

impl InviteArgs {
    fn claims(&self) -> InvitationClaims {
        let params = InvitationParams {
            invitor_organization_address: self.organization_address.clone(),
            registry_contract_address: self.registry_contract.clone(),
            workgroup_id: self.workgroup.clone(),
            invitor_subject_account_id: SubjectAccountId::derive(&self.organization, &self.workgroup),
        };
        let permissions = MessagingPermissions::compose(
            SubjectPermissions { allow: self.publish_allow.clone(), deny: self.publish_deny.clone() },
            SubjectPermissions {
                allow: self.subscribe_allow.clone(),
                deny: self.subscribe_deny.clone(),
            },
            SubjectPermissions {
                allow: self.responses_allow.clone(),
                deny: self.responses_deny.clone(),
            },
        );

        InvitationClaims::new(
            &self.organization,
            self.messaging_endpoint.clone(),
            self.email.clone(),
            Utc::now(),
            params,
        )
        .with_permissions(permissions)
    }
}

/// Sign an invitation with the organization's RSA key and deliver it.
pub async fn invite(args: InviteArgs, config: Config) -> Result<()> {
    let token =
        Config::access_token().context("BPI_ACCESS_TOKEN must be set to sign invitations")?;
    let platform: Arc<dyn PlatformApi> = Arc::new(HttpPlatformClient::new(
        PlatformEndpoints {
            ident: config.ident_endpoint.clone(),
            vault: config.vault_endpoint.clone(),
            nchain: config.nchain_endpoint.clone(),
            api: format!("http://localhost:{}", ports::PORT_API),
        },
        Some(token),
    )?);

    let provisioner = KeyProvisioner::new(Arc::clone(&platform), &args.organization);
    let vault = provisioner.require_vault().await.context("Failed to resolve organization vault")?;

    let vendor = InvitationVendor::new(Arc::clone(&platform), provisioner);
    let jwt = vendor.vend(&vault.id, &args.claims()).await.context("Failed to sign invitation")?;

    if !args.no_deliver {
        let request = InvitationRequest {
            email: args.email.clone(),
            first_name: args.first_name.clone(),
            last_name: args.last_name.clone(),
            organization_id: args.organization.clone(),
            application_id: args.workgroup.clone(),
            token: jwt.clone(),
        };
        platform.create_invitation(&request).await.context("Failed to deliver invitation")?;
        eprintln!("{} Invitation sent to {}", "✓".green().bold(), args.email.bold());
    }

    println!("{}", jwt);
    Ok(())
}

//! Organization bootstrap.
//!
//! Runs once the stack is up:
//! 1. Require the organization vault
//! 2. Require the four key specs (best effort)
//! 3. Sign terms-of-service and privacy consent with the secp256k1 key
//! 4. Record the workgroup entry in the organization metadata
//! 5. Wait for the protocol API to report healthy
//! 6. Resolve the workgroup's registry contract
//! 7. Ensure the deterministic subject account exists

use crate::error::{Result, StackError};
use crate::platform::{
    Contract, Key, KeySpec, PlatformApi, SubjectAccount, SubjectAccountMetadata, Vault,
};
use crate::provision::KeyProvisioner;
use crate::readiness::{INITIAL_BACKOFF, MAX_BACKOFF};
use crate::types::{ConsentKind, OrganizationContext};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default bound on waiting for the registry contract.
pub const CONTRACT_TIMEOUT: Duration = Duration::from_secs(600);

/// Interval between registry contract lookups.
pub const CONTRACT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub api_health_timeout: Duration,
    pub contract_timeout: Duration,
    pub contract_poll_interval: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            api_health_timeout: Duration::from_secs(120),
            contract_timeout: CONTRACT_TIMEOUT,
            contract_poll_interval: CONTRACT_POLL_INTERVAL,
        }
    }
}

/// What the bootstrap converged to.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub vault: Vault,

    /// Keys that could be provisioned, by spec string
    pub keys: BTreeMap<String, Key>,

    pub registry_contract_address: Option<String>,
    pub subject_account: SubjectAccount,

    /// Whether the subject account was created by this run
    pub subject_account_created: bool,
}

pub struct OrganizationBootstrap {
    platform: Arc<dyn PlatformApi>,
    context: Arc<OrganizationContext>,
    provisioner: KeyProvisioner,
    options: BootstrapOptions,
}

impl OrganizationBootstrap {
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        context: Arc<OrganizationContext>,
        options: BootstrapOptions,
    ) -> Self {
        let provisioner = KeyProvisioner::new(Arc::clone(&platform), &context.organization_id);
        Self { platform, context, provisioner, options }
    }

    #[instrument(skip(self), fields(
        organization = %self.context.organization_id,
        workgroup = %self.context.workgroup_id,
    ))]
    pub async fn run(&self) -> Result<BootstrapOutcome> {
        let vault = self.provisioner.require_vault().await?;
        let keys = self.provisioner.require_keypairs(&vault.id, &KeySpec::ALL).await;

        self.record_workgroup(&vault, keys.get(KeySpec::Secp256k1.as_str())).await?;
        self.await_api().await?;

        let registry_contract_address = match &self.context.registry_contract_address {
            Some(address) => Some(address.clone()),
            None => match self.await_registry_contract().await {
                Ok(address) => Some(address),
                Err(e @ StackError::ContractNotDeployed { .. }) => {
                    warn!(error = %e, "Continuing without a registry contract");
                    None
                }
                Err(e) => return Err(e),
            },
        };

        let signing_address = keys.get(KeySpec::Secp256k1.as_str()).and_then(|k| k.address.clone());
        let (subject_account, subject_account_created) = self
            .require_subject_account(registry_contract_address.clone(), signing_address)
            .await?;

        info!(
            vault = %vault.id,
            keys = keys.len(),
            subject_account = %subject_account.id,
            created = subject_account_created,
            "Organization bootstrapped"
        );

        Ok(BootstrapOutcome {
            vault,
            keys,
            registry_contract_address,
            subject_account,
            subject_account_created,
        })
    }

    /// Sign consent and write the workgroup entry into the organization metadata.
    async fn record_workgroup(&self, vault: &Vault, signing_key: Option<&Key>) -> Result<()> {
        let ctx = &self.context;
        let mut organization = self.platform.get_organization(&ctx.organization_id).await?;
        let metadata = &mut organization.metadata;

        if metadata.address.is_none() {
            metadata.address = signing_key.and_then(|k| k.address.clone());
        }

        let entry = metadata.workgroup_mut(&ctx.workgroup_id, ctx.operator_separation_degree);
        entry.vault_id = Some(vault.id.clone());
        if !entry.is_operator() {
            // Participants keep private copies; the shared list belongs to the operator.
            entry.system_secret_ids.clear();
        }

        match signing_key {
            Some(key) => {
                let now = Utc::now();
                for kind in [ConsentKind::TermsOfService, ConsentKind::PrivacyPolicy] {
                    let record = self.provisioner.sign_consent(&vault.id, &key.id, kind, now).await?;
                    entry.record_consent(kind, record);
                }
            }
            None => warn!("No secp256k1 key available; consent not recorded"),
        }

        self.platform.update_organization_metadata(&ctx.organization_id, metadata).await?;
        debug!(degree = ctx.operator_separation_degree, "Workgroup metadata recorded");
        Ok(())
    }

    /// Poll the protocol API until healthy, bounded by the health timeout.
    pub async fn await_api(&self) -> Result<()> {
        let started = Instant::now();
        let poll = async {
            let mut delay = INITIAL_BACKOFF;
            loop {
                match self.platform.api_status().await {
                    Ok(()) => return,
                    Err(e) => debug!(error = %e, "API not healthy yet"),
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        };

        tokio::time::timeout(self.options.api_health_timeout, poll).await.map_err(|_| {
            StackError::ApiUnhealthy { endpoint: "status".to_string(), waited: started.elapsed() }
        })?;
        info!(waited = ?started.elapsed(), "API healthy");
        Ok(())
    }

    /// Poll for a deployed registry contract in the workgroup.
    pub async fn await_registry_contract(&self) -> Result<String> {
        let ctx = &self.context;
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.options.contract_poll_interval);

        let poll = async {
            loop {
                ticker.tick().await;
                match self.platform.list_contracts(&ctx.workgroup_id, Contract::ORGANIZATION_REGISTRY).await {
                    Ok(contracts) => {
                        if let Some(address) =
                            contracts.into_iter().find(Contract::is_deployed).and_then(|c| c.address)
                        {
                            return address;
                        }
                        debug!("Registry contract not deployed yet");
                    }
                    Err(e) => debug!(error = %e, "Registry contract lookup failed"),
                }
            }
        };

        let address = tokio::time::timeout(self.options.contract_timeout, poll).await.map_err(|_| {
            StackError::ContractNotDeployed {
                workgroup_id: ctx.workgroup_id.clone(),
                waited: started.elapsed(),
            }
        })?;
        info!(address = %address, "Registry contract resolved");
        Ok(address)
    }

    /// Get the subject account by its deterministic id, creating it if absent.
    pub async fn require_subject_account(
        &self,
        registry_contract_address: Option<String>,
        organization_address: Option<String>,
    ) -> Result<(SubjectAccount, bool)> {
        let ctx = &self.context;
        let id = ctx.subject_account_id();

        match self.platform.get_subject_account(&ctx.organization_id, &id).await {
            Ok(account) => {
                debug!(subject_account = %id, "Subject account exists");
                return Ok((account, false));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let account = SubjectAccount {
            id: id.clone(),
            subject_id: ctx.organization_id.clone(),
            metadata: SubjectAccountMetadata {
                organization_id: ctx.organization_id.clone(),
                workgroup_id: ctx.workgroup_id.clone(),
                organization_address,
                registry_contract_address,
                network_id: ctx.network_id.clone(),
                messaging_endpoint: None,
            },
        };
        let created = self.platform.create_subject_account(&ctx.organization_id, &account).await?;
        if created.id != id {
            return Err(StackError::platform(
                "create_subject_account",
                None,
                format!("server assigned {} instead of {}", created.id, id),
            ));
        }
        info!(subject_account = %id, "Created subject account");
        Ok((created, true))
    }
}

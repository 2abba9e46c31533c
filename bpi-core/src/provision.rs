//! Key and credential provisioning.
//!
//! Every operation here converges: a vault or key that already exists is the
//! same success as one created just now, so the bootstrap can be rerun freely.

use crate::error::{Result, StackError};
use crate::observability::metrics;
use crate::platform::{Key, KeySpec, PlatformApi, SignOptions, Vault};
use crate::types::{ConsentKind, ConsentRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Ensures the organization's vault and keys exist and signs consent proofs.
#[derive(Clone)]
pub struct KeyProvisioner {
    platform: Arc<dyn PlatformApi>,
    organization_id: String,
}

impl KeyProvisioner {
    pub fn new(platform: Arc<dyn PlatformApi>, organization_id: impl Into<String>) -> Self {
        Self { platform, organization_id: organization_id.into() }
    }

    /// The organization's vault, created if it has none.
    #[instrument(skip(self), fields(organization = %self.organization_id))]
    pub async fn require_vault(&self) -> Result<Vault> {
        let vaults = self.platform.list_vaults(&self.organization_id).await?;
        if let Some(vault) = vaults.into_iter().next() {
            debug!(vault = %vault.id, "Using existing vault");
            return Ok(vault);
        }

        let vault = self
            .platform
            .create_vault(
                &self.organization_id,
                &format!("{} vault", self.organization_id),
                "Organization vault for the local stack",
            )
            .await?;
        info!(vault = %vault.id, "Created vault");
        Ok(vault)
    }

    /// The first key of `spec` in the vault, created if there is none.
    #[instrument(skip(self), fields(spec = %spec))]
    pub async fn require_keypair(&self, vault_id: &str, spec: KeySpec) -> Result<Key> {
        let keys = self.platform.list_keys(vault_id, spec).await?;
        if let Some(key) = keys.into_iter().find(|k| k.spec == spec.as_str()) {
            debug!(key = %key.id, "Using existing key");
            return Ok(key);
        }

        let key = self.platform.create_key(vault_id, spec, spec.default_name()).await?;
        metrics::record_key_created(spec.as_str());
        info!(key = %key.id, "Created key");
        Ok(key)
    }

    /// Require every spec, logging and skipping the ones that fail.
    pub async fn require_keypairs(&self, vault_id: &str, specs: &[KeySpec]) -> BTreeMap<String, Key> {
        let mut keys = BTreeMap::new();
        for spec in specs {
            match self.require_keypair(vault_id, *spec).await {
                Ok(key) => {
                    keys.insert(spec.as_str().to_string(), key);
                }
                Err(e) => warn!(spec = %spec, error = %e, "Failed to provision key; continuing"),
            }
        }
        keys
    }

    /// Sign a consent timestamp with a vault key.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn sign_consent(
        &self,
        vault_id: &str,
        key_id: &str,
        kind: ConsentKind,
        at: DateTime<Utc>,
    ) -> Result<ConsentRecord> {
        let agreed_at = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let digest = consent_digest(&agreed_at);

        let signature = self
            .platform
            .sign(vault_id, key_id, &digest, &SignOptions::default())
            .await
            .map_err(|e| match e {
                StackError::SigningFailed { .. } => e,
                other => StackError::SigningFailed { reason: other.to_string() },
            })?;

        info!(agreed_at = %agreed_at, "Consent signed");
        Ok(ConsentRecord { agreed_at, signature })
    }
}

/// Hex SHA-256 of the hex-encoded timestamp: the payload a consent key signs.
pub fn consent_digest(agreed_at: &str) -> String {
    hex::encode(Sha256::digest(hex::encode(agreed_at).as_bytes()))
}

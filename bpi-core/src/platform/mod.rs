//! Remote platform boundary.
//!
//! The identity, vault, chain and protocol API services are external
//! collaborators. The core only needs the create/list/get operations in
//! `PlatformApi`; `HttpPlatformClient` implements them over HTTP and tests
//! substitute in-memory fakes.

use crate::error::Result;
use crate::subject::SubjectAccountId;
use crate::types::OrganizationMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

mod http;

pub use http::{HttpPlatformClient, PlatformEndpoints};

/// Key specs the bootstrap provisions for every organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpec {
    #[serde(rename = "secp256k1")]
    Secp256k1,
    #[serde(rename = "BIP39")]
    Bip39,
    #[serde(rename = "RSA-4096")]
    Rsa4096,
    #[serde(rename = "babyJubJub")]
    BabyJubJub,
}

impl KeySpec {
    pub const ALL: [KeySpec; 4] =
        [KeySpec::Secp256k1, KeySpec::Bip39, KeySpec::Rsa4096, KeySpec::BabyJubJub];

    /// Spec string understood by the vault.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySpec::Secp256k1 => "secp256k1",
            KeySpec::Bip39 => "BIP39",
            KeySpec::Rsa4096 => "RSA-4096",
            KeySpec::BabyJubJub => "babyJubJub",
        }
    }

    /// Default key name used when the bootstrap creates one.
    pub fn default_name(&self) -> &'static str {
        match self {
            KeySpec::Secp256k1 => "secp256k1 signing key",
            KeySpec::Bip39 => "HD wallet",
            KeySpec::Rsa4096 => "RSA-4096 invitation signing key",
            KeySpec::BabyJubJub => "babyJubJub zero-knowledge key",
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A key held in a vault. Private material never leaves the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    pub vault_id: String,
    pub spec: String,
    pub name: String,

    /// Chain address (secp256k1 keys)
    #[serde(default)]
    pub address: Option<String>,

    /// PEM public key (RSA keys), hex public key otherwise
    #[serde(default)]
    pub public_key: Option<String>,

    /// RFC3339 creation time, used to pick the most recent key
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Options for a remote signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

impl SignOptions {
    pub fn algorithm(algorithm: impl Into<String>) -> Self {
        Self { algorithm: Some(algorithm.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: OrganizationMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl Contract {
    /// Type tag of the workgroup's organization registry.
    pub const ORGANIZATION_REGISTRY: &'static str = "organization-registry";

    /// Whether the contract has been deployed (has an address).
    pub fn is_deployed(&self) -> bool {
        self.address.as_deref().is_some_and(|a| !a.is_empty() && a != "0x")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAccountMetadata {
    pub organization_id: String,
    pub workgroup_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_endpoint: Option<String>,
}

/// A workgroup participant's account on the protocol API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAccount {
    pub id: SubjectAccountId,
    pub subject_id: String,
    #[serde(default)]
    pub metadata: SubjectAccountMetadata,
}

/// Invitation submitted to the identity service for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub organization_id: String,
    pub application_id: String,

    /// Signed compact JWT
    pub token: String,
}

/// Operations consumed from the remote platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_vaults(&self, organization_id: &str) -> Result<Vec<Vault>>;

    async fn create_vault(&self, organization_id: &str, name: &str, description: &str)
        -> Result<Vault>;

    async fn list_keys(&self, vault_id: &str, spec: KeySpec) -> Result<Vec<Key>>;

    async fn create_key(&self, vault_id: &str, spec: KeySpec, name: &str) -> Result<Key>;

    /// Sign a hex-encoded payload with a vault key; returns the hex signature.
    async fn sign(
        &self,
        vault_id: &str,
        key_id: &str,
        message_hex: &str,
        options: &SignOptions,
    ) -> Result<String>;

    async fn get_organization(&self, organization_id: &str) -> Result<Organization>;

    async fn update_organization_metadata(
        &self,
        organization_id: &str,
        metadata: &OrganizationMetadata,
    ) -> Result<()>;

    async fn list_contracts(&self, workgroup_id: &str, contract_type: &str) -> Result<Vec<Contract>>;

    async fn create_subject_account(
        &self,
        organization_id: &str,
        account: &SubjectAccount,
    ) -> Result<SubjectAccount>;

    /// Look up a subject account by its deterministic id.
    async fn get_subject_account(
        &self,
        organization_id: &str,
        id: &SubjectAccountId,
    ) -> Result<SubjectAccount>;

    async fn create_invitation(&self, request: &InvitationRequest) -> Result<()>;

    /// Succeeds once the protocol API reports healthy.
    async fn api_status(&self) -> Result<()>;
}

//! Organization and workgroup domain types.

use crate::subject::SubjectAccountId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Organization, workgroup and credential state for one invocation.
///
/// Built once before any concurrent work begins and shared by reference
/// afterwards; nothing mutates it after construction.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationContext {
    pub organization_id: String,
    pub organization_name: Option<String>,
    pub workgroup_id: String,

    /// Operator-separation degree within the workgroup (0 = operator)
    pub operator_separation_degree: u32,

    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub registry_contract_address: Option<String>,
    pub network_id: Option<String>,
}

impl OrganizationContext {
    pub fn new(organization_id: impl Into<String>, workgroup_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            organization_name: None,
            workgroup_id: workgroup_id.into(),
            operator_separation_degree: 0,
            access_token: None,
            refresh_token: None,
            registry_contract_address: None,
            network_id: None,
        }
    }

    pub fn with_tokens(mut self, access: Option<String>, refresh: Option<String>) -> Self {
        self.access_token = access;
        self.refresh_token = refresh;
        self
    }

    pub fn with_registry_contract(mut self, address: Option<String>) -> Self {
        self.registry_contract_address = address;
        self
    }

    pub fn with_network(mut self, network_id: Option<String>) -> Self {
        self.network_id = network_id;
        self
    }

    pub fn with_separation_degree(mut self, degree: u32) -> Self {
        self.operator_separation_degree = degree;
        self
    }

    /// Whether this organization operates the workgroup.
    pub fn is_operator(&self) -> bool {
        self.operator_separation_degree == 0
    }

    /// Deterministic subject account for this organization in this workgroup.
    pub fn subject_account_id(&self) -> SubjectAccountId {
        SubjectAccountId::derive(&self.organization_id, &self.workgroup_id)
    }
}

impl fmt::Debug for OrganizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrganizationContext")
            .field("organization_id", &self.organization_id)
            .field("organization_name", &self.organization_name)
            .field("workgroup_id", &self.workgroup_id)
            .field("operator_separation_degree", &self.operator_separation_degree)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("registry_contract_address", &self.registry_contract_address)
            .field("network_id", &self.network_id)
            .finish()
    }
}

/// Legal text an operator can consent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentKind {
    TermsOfService,
    PrivacyPolicy,
}

impl fmt::Display for ConsentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentKind::TermsOfService => write!(f, "terms of service"),
            ConsentKind::PrivacyPolicy => write!(f, "privacy policy"),
        }
    }
}

/// Signed proof that a human accepted a legal text at a specific time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// RFC3339 timestamp that was signed
    pub agreed_at: String,

    /// Hex signature over the hashed, hex-encoded timestamp
    pub signature: String,
}

/// Per-workgroup state recorded in the organization's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkgroupMetadata {
    #[serde(default)]
    pub operator_separation_degree: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<String>,

    #[serde(default)]
    pub system_secret_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tos: Option<ConsentRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_policy: Option<ConsentRecord>,
}

impl WorkgroupMetadata {
    /// Degree 0 owns the workgroup's shared vault and system secrets.
    pub fn is_operator(&self) -> bool {
        self.operator_separation_degree == 0
    }

    pub fn record_consent(&mut self, kind: ConsentKind, record: ConsentRecord) {
        match kind {
            ConsentKind::TermsOfService => self.tos = Some(record),
            ConsentKind::PrivacyPolicy => self.privacy_policy = Some(record),
        }
    }

    pub fn consent(&self, kind: ConsentKind) -> Option<&ConsentRecord> {
        match kind {
            ConsentKind::TermsOfService => self.tos.as_ref(),
            ConsentKind::PrivacyPolicy => self.privacy_policy.as_ref(),
        }
    }
}

/// Application metadata attached to an organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMetadata {
    /// Public signing address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default)]
    pub workgroups: BTreeMap<String, WorkgroupMetadata>,

    /// Fields written by other tools, preserved on update
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OrganizationMetadata {
    /// Workgroup entry, created with the given separation degree if absent.
    pub fn workgroup_mut(&mut self, workgroup_id: &str, degree: u32) -> &mut WorkgroupMetadata {
        self.workgroups.entry(workgroup_id.to_string()).or_insert_with(|| WorkgroupMetadata {
            operator_separation_degree: degree,
            ..Default::default()
        })
    }
}

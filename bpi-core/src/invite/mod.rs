//! Invitation tokens.
//!
//! An invitation is a compact RS256 JWT signed by the invitor's vault-held
//! RSA key. The header's `kid` is the key's SSH-style MD5 fingerprint so a
//! verifier holding several trusted keys can pick the right one.

use crate::error::{Result, StackError};
use crate::observability::metrics;
use crate::platform::{KeySpec, PlatformApi, SignOptions};
use crate::provision::KeyProvisioner;
use crate::subject::SubjectAccountId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

pub mod fingerprint;
mod verify;

pub use verify::{InvitationVerifier, VerifiedInvitation};

/// The only accepted signing algorithm.
pub const ALGORITHM: &str = "RS256";

/// Prefix of the `iss` claim ahead of the organization id.
pub const ISSUER_PREFIX: &str = "organization:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub typ: String,
}

/// Workgroup parameters the invitee needs to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitor_organization_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_contract_address: Option<String>,
    pub workgroup_id: String,
    pub invitor_subject_account_id: SubjectAccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationData {
    pub params: InvitationParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPayload {
    pub data: InvitationData,
}

/// Subject patterns allowed and denied for one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPermissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl SubjectPermissions {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// Messaging permissions granted to the invitee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<SubjectPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<SubjectPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<SubjectPermissions>,
}

impl MessagingPermissions {
    /// Compose a grant, keeping only non-empty lists.
    ///
    /// Returns `None` when every list is empty so the claim is omitted.
    pub fn compose(
        publish: SubjectPermissions,
        subscribe: SubjectPermissions,
        responses: SubjectPermissions,
    ) -> Option<Self> {
        let permissions = Self {
            publish: publish.non_empty(),
            subscribe: subscribe.non_empty(),
            responses: responses.non_empty(),
        };
        if permissions.publish.is_none()
            && permissions.subscribe.is_none()
            && permissions.responses.is_none()
        {
            None
        } else {
            Some(permissions)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingGrant {
    pub permissions: MessagingPermissions,
}

/// Claims of an invitation token. Field order is the encoding order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationClaims {
    /// Invitor's published messaging endpoint
    pub aud: String,
    pub iat: i64,

    /// `organization:<invitor organization id>`
    pub iss: String,

    /// Invitee email
    pub sub: String,

    pub prvd: ProtocolPayload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats: Option<MessagingGrant>,
}

impl InvitationClaims {
    pub fn new(
        organization_id: &str,
        audience: impl Into<String>,
        invitee_email: impl Into<String>,
        issued_at: DateTime<Utc>,
        params: InvitationParams,
    ) -> Self {
        Self {
            aud: audience.into(),
            iat: issued_at.timestamp(),
            iss: format!("{}{}", ISSUER_PREFIX, organization_id),
            sub: invitee_email.into(),
            prvd: ProtocolPayload { data: InvitationData { params } },
            nats: None,
        }
    }

    /// Attach a messaging grant; `None` leaves the claim out entirely.
    pub fn with_permissions(mut self, permissions: Option<MessagingPermissions>) -> Self {
        self.nats = permissions.map(|permissions| MessagingGrant { permissions });
        self
    }

    /// Invitor organization id from `iss`.
    pub fn issuer_organization_id(&self) -> Option<&str> {
        self.iss.strip_prefix(ISSUER_PREFIX).filter(|id| !id.is_empty())
    }

    pub fn params(&self) -> &InvitationParams {
        &self.prvd.data.params
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| StackError::SigningFailed { reason: format!("encode: {}", e) })?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// `b64url(header) + "." + b64url(claims)`.
pub fn signing_input(header: &JwtHeader, claims: &InvitationClaims) -> Result<String> {
    Ok(format!("{}.{}", encode_segment(header)?, encode_segment(claims)?))
}

/// Builds invitation tokens signed by the organization's RSA vault key.
#[derive(Clone)]
pub struct InvitationVendor {
    platform: Arc<dyn PlatformApi>,
    provisioner: KeyProvisioner,
}

impl InvitationVendor {
    pub fn new(platform: Arc<dyn PlatformApi>, provisioner: KeyProvisioner) -> Self {
        Self { platform, provisioner }
    }

    /// Sign `claims` into a compact JWT.
    ///
    /// Any fingerprint, signing or encoding failure aborts; no partial token
    /// is ever returned.
    #[instrument(skip(self, claims), fields(sub = %claims.sub))]
    pub async fn vend(&self, vault_id: &str, claims: &InvitationClaims) -> Result<String> {
        let key = self.provisioner.require_keypair(vault_id, KeySpec::Rsa4096).await?;
        let pem = key.public_key.as_deref().ok_or_else(|| StackError::InvalidPublicKey {
            reason: format!("key {} has no public key", key.id),
        })?;
        let kid = fingerprint::fingerprint_pem(pem)?;

        let header =
            JwtHeader { alg: ALGORITHM.to_string(), kid: Some(kid.clone()), typ: "JWT".to_string() };
        let input = signing_input(&header, claims)?;

        let signature_hex = self
            .platform
            .sign(vault_id, &key.id, &hex::encode(input.as_bytes()), &SignOptions::algorithm(ALGORITHM))
            .await
            .map_err(|e| match e {
                StackError::SigningFailed { .. } => e,
                other => StackError::SigningFailed { reason: other.to_string() },
            })?;
        let signature = hex::decode(signature_hex.trim_start_matches("0x"))
            .map_err(|e| StackError::SigningFailed { reason: format!("signature not hex: {}", e) })?;
        if signature.is_empty() {
            return Err(StackError::SigningFailed { reason: "empty signature".to_string() });
        }

        metrics::record_invitation_vended();
        info!(kid = %kid, "Invitation signed");
        Ok(format!("{}.{}", input, URL_SAFE_NO_PAD.encode(signature)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> InvitationParams {
        InvitationParams {
            invitor_organization_address: Some("0xabc".to_string()),
            registry_contract_address: None,
            workgroup_id: "wg-1".to_string(),
            invitor_subject_account_id: SubjectAccountId::derive("org-1", "wg-1"),
        }
    }

    fn claims() -> InvitationClaims {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        InvitationClaims::new("org-1", "nats://org-1.example:4222", "bob@example.com", at, params())
    }

    #[test]
    fn test_empty_permissions_omitted() {
        let grant = MessagingPermissions::compose(
            SubjectPermissions::default(),
            SubjectPermissions::default(),
            SubjectPermissions::default(),
        );
        assert!(grant.is_none());

        let json = serde_json::to_value(claims().with_permissions(grant)).unwrap();
        assert!(json.get("nats").is_none());
    }

    #[test]
    fn test_partial_permissions_keep_only_non_empty() {
        let grant = MessagingPermissions::compose(
            SubjectPermissions { allow: vec!["baseline.>".to_string()], deny: vec![] },
            SubjectPermissions::default(),
            SubjectPermissions { allow: vec![], deny: vec!["_INBOX.>".to_string()] },
        );
        let json = serde_json::to_value(claims().with_permissions(grant)).unwrap();
        let permissions = &json["nats"]["permissions"];

        assert_eq!(permissions["publish"]["allow"][0], "baseline.>");
        assert!(permissions["publish"].get("deny").is_none());
        assert!(permissions.get("subscribe").is_none());
        assert_eq!(permissions["responses"]["deny"][0], "_INBOX.>");
    }

    #[test]
    fn test_claims_encoding_order() {
        let json = serde_json::to_string(&claims()).unwrap();
        let aud = json.find("\"aud\"").unwrap();
        let iat = json.find("\"iat\"").unwrap();
        let iss = json.find("\"iss\"").unwrap();
        let sub = json.find("\"sub\"").unwrap();
        assert!(aud < iat && iat < iss && iss < sub);
        assert!(json.contains("\"iss\":\"organization:org-1\""));
    }

    #[test]
    fn test_issuer_organization_id() {
        assert_eq!(claims().issuer_organization_id(), Some("org-1"));

        let mut bad = claims();
        bad.iss = "org-1".to_string();
        assert_eq!(bad.issuer_organization_id(), None);
    }

    #[test]
    fn test_signing_input_has_no_padding() {
        let header = JwtHeader { alg: ALGORITHM.to_string(), kid: None, typ: "JWT".to_string() };
        let input = signing_input(&header, &claims()).unwrap();
        assert!(!input.contains('='));
        assert_eq!(input.split('.').count(), 2);
    }
}

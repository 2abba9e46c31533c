//! Invitation verification on the invitee side.

use super::{fingerprint, InvitationClaims, JwtHeader, ALGORITHM};
use crate::error::{Result, StackError};
use crate::types::OrganizationContext;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

struct TrustedKey {
    fingerprint: String,
    key: RsaPublicKey,
}

/// A token whose signature and subject account check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedInvitation {
    pub claims: InvitationClaims,

    /// Invitor organization id from `iss`
    pub invitor_organization_id: String,

    /// Fingerprint of the key that verified the signature
    pub fingerprint: String,

    /// Whether the key was selected by `kid` rather than the fallback
    pub kid_matched: bool,
}

impl VerifiedInvitation {
    /// Context for the invitee joining the invitor's workgroup as a participant.
    pub fn participant_context(&self, organization_id: &str) -> OrganizationContext {
        let params = self.claims.params();
        OrganizationContext::new(organization_id, params.workgroup_id.clone())
            .with_separation_degree(1)
            .with_registry_contract(params.registry_contract_address.clone())
    }
}

/// Verifies invitations against the invitor's published RSA keys.
#[derive(Default)]
pub struct InvitationVerifier {
    keys: Vec<TrustedKey>,
}

impl InvitationVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a PEM public key; later keys count as more recently registered.
    pub fn trust_pem(&mut self, pem: &str) -> Result<String> {
        let key = fingerprint::parse_public_key(pem)?;
        let fingerprint = fingerprint::fingerprint(&key);
        self.keys.push(TrustedKey { fingerprint: fingerprint.clone(), key });
        Ok(fingerprint)
    }

    /// Key named by `kid`, else the most recently registered one.
    fn select(&self, kid: Option<&str>) -> Option<(&TrustedKey, bool)> {
        if let Some(kid) = kid {
            if let Some(key) = self.keys.iter().find(|k| k.fingerprint == kid) {
                return Some((key, true));
            }
            warn!(kid = %kid, "No trusted key matches kid; falling back to most recent key");
        }
        self.keys.last().map(|key| (key, false))
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedInvitation> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three segments"));
        };

        let header: JwtHeader = decode_segment(header_b64, "header")?;
        if header.alg != ALGORITHM {
            return Err(invalid(&format!("unsupported algorithm {}", header.alg)));
        }

        let (trusted, kid_matched) =
            self.select(header.kid.as_deref()).ok_or_else(|| invalid("no trusted keys"))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| invalid(&format!("signature encoding: {}", e)))?;
        let digest = Sha256::digest(format!("{}.{}", header_b64, claims_b64).as_bytes());
        trusted
            .key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let claims: InvitationClaims = decode_segment(claims_b64, "claims")?;
        let invitor = claims
            .issuer_organization_id()
            .ok_or_else(|| invalid(&format!("unexpected issuer {}", claims.iss)))?
            .to_string();

        let params = claims.params();
        if !params.invitor_subject_account_id.matches(&invitor, &params.workgroup_id) {
            return Err(invalid("invitor subject account does not match organization and workgroup"));
        }

        debug!(invitor = %invitor, kid_matched, "Invitation verified");
        Ok(VerifiedInvitation {
            invitor_organization_id: invitor,
            fingerprint: trusted.fingerprint.clone(),
            kid_matched,
            claims,
        })
    }
}

fn invalid(reason: &str) -> StackError {
    StackError::InvalidToken { reason: reason.to_string() }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| invalid(&format!("{} encoding: {}", what, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| invalid(&format!("{}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_tokens_rejected() {
        let verifier = InvitationVerifier::new();
        for token in ["", "a.b", "a.b.c.d"] {
            assert!(matches!(verifier.verify(token), Err(StackError::InvalidToken { .. })));
        }
    }

    #[test]
    fn test_non_rs256_rejected_before_key_lookup() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let token = format!("{}.e30.c2ln", header);
        let err = InvitationVerifier::new().verify(&token).unwrap_err();
        assert!(err.to_string().contains("HS256"));
    }
}

//! Integration tests for organization bootstrap and invitations.
//!
//! An in-memory platform stands in for the identity, vault and protocol APIs.
//! Its vault signs with a locally generated RSA key, so tokens vended here
//! verify against the real verifier.
//! - Vault and key provisioning converge
//! - Bootstrap creates the subject account once and reuses it afterwards
//! - Invitation tokens are deterministic and verifiable
//! - Tampered or mis-attributed tokens are rejected

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bpi_core::bootstrap::{BootstrapOptions, OrganizationBootstrap};
use bpi_core::error::{Result, StackError};
use bpi_core::invite::{
    fingerprint, signing_input, InvitationClaims, InvitationParams, InvitationVendor,
    InvitationVerifier, JwtHeader, MessagingPermissions, SubjectPermissions, ALGORITHM,
};
use bpi_core::platform::{
    Contract, InvitationRequest, Key, KeySpec, Organization, PlatformApi, SignOptions,
    SubjectAccount, Vault,
};
use bpi_core::provision::KeyProvisioner;
use bpi_core::subject::SubjectAccountId;
use bpi_core::types::{ConsentKind, OrganizationContext, OrganizationMetadata, WorkgroupMetadata};
use chrono::DateTime;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

const REGISTRY_ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

/// One RSA key shared by every test; generation is slow.
fn signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

/// Second key, registered after `signing_key` when a test needs rotation.
fn rotated_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

fn pem_of(key: &RsaPrivateKey) -> String {
    key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap()
}

fn public_pem() -> String {
    pem_of(signing_key())
}

fn rsa_sign_with(key: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(message);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap()
}

fn rsa_sign(message: &[u8]) -> Vec<u8> {
    rsa_sign_with(signing_key(), message)
}

/// In-memory platform with call counters.
#[derive(Default)]
struct MockPlatform {
    vaults: Mutex<Vec<Vault>>,
    keys: Mutex<Vec<Key>>,
    organizations: Mutex<HashMap<String, Organization>>,
    contracts: Mutex<Vec<Contract>>,
    subject_accounts: Mutex<HashMap<String, SubjectAccount>>,
    invitations: Mutex<Vec<InvitationRequest>>,

    /// Key specs whose creation fails
    failing_specs: Vec<&'static str>,

    /// `api_status` fails this many times before succeeding
    unhealthy_polls: AtomicUsize,
    never_healthy: bool,

    vault_creates: AtomicUsize,
    key_creates: AtomicUsize,
    subject_creates: AtomicUsize,
}

impl MockPlatform {
    fn with_organization(id: &str, metadata: OrganizationMetadata) -> Self {
        let platform = Self::default();
        platform.organizations.lock().unwrap().insert(
            id.to_string(),
            Organization { id: id.to_string(), name: "Acme".to_string(), metadata },
        );
        platform
    }

    fn deploy_registry(&self, workgroup_id: &str) {
        self.contracts.lock().unwrap().push(Contract {
            id: format!("contract-{}", workgroup_id),
            name: "Organization Registry".to_string(),
            contract_type: Contract::ORGANIZATION_REGISTRY.to_string(),
            address: Some(REGISTRY_ADDRESS.to_string()),
        });
    }

    fn metadata(&self, organization_id: &str) -> OrganizationMetadata {
        self.organizations.lock().unwrap()[organization_id].metadata.clone()
    }
}

fn not_found(resource: &str, id: &str) -> StackError {
    StackError::NotFound { resource: resource.to_string(), id: id.to_string() }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn list_vaults(&self, _organization_id: &str) -> Result<Vec<Vault>> {
        Ok(self.vaults.lock().unwrap().clone())
    }

    async fn create_vault(&self, _organization_id: &str, name: &str, description: &str) -> Result<Vault> {
        let n = self.vault_creates.fetch_add(1, Ordering::SeqCst) + 1;
        let vault = Vault {
            id: format!("vault-{}", n),
            name: name.to_string(),
            description: Some(description.to_string()),
        };
        self.vaults.lock().unwrap().push(vault.clone());
        Ok(vault)
    }

    async fn list_keys(&self, vault_id: &str, spec: KeySpec) -> Result<Vec<Key>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.vault_id == vault_id && k.spec == spec.as_str())
            .cloned()
            .collect())
    }

    async fn create_key(&self, vault_id: &str, spec: KeySpec, name: &str) -> Result<Key> {
        if self.failing_specs.contains(&spec.as_str()) {
            return Err(StackError::platform("create_key", Some(500), "unsupported spec"));
        }
        let n = self.key_creates.fetch_add(1, Ordering::SeqCst) + 1;
        let key = Key {
            id: format!("key-{}", n),
            vault_id: vault_id.to_string(),
            spec: spec.as_str().to_string(),
            name: name.to_string(),
            address: (spec == KeySpec::Secp256k1).then(|| format!("0x{:040x}", n)),
            public_key: (spec == KeySpec::Rsa4096).then(public_pem),
            created_at: None,
        };
        self.keys.lock().unwrap().push(key.clone());
        Ok(key)
    }

    async fn sign(
        &self,
        _vault_id: &str,
        key_id: &str,
        message_hex: &str,
        options: &SignOptions,
    ) -> Result<String> {
        let message = hex::decode(message_hex)
            .map_err(|e| StackError::SigningFailed { reason: e.to_string() })?;
        if options.algorithm.as_deref() == Some(ALGORITHM) {
            let is_rsa = self
                .keys
                .lock()
                .unwrap()
                .iter()
                .any(|k| k.id == key_id && k.spec == KeySpec::Rsa4096.as_str());
            if !is_rsa {
                return Err(StackError::SigningFailed { reason: "not an RSA key".to_string() });
            }
            return Ok(hex::encode(rsa_sign(&message)));
        }
        Ok(hex::encode(Sha256::digest(&message)))
    }

    async fn get_organization(&self, organization_id: &str) -> Result<Organization> {
        self.organizations
            .lock()
            .unwrap()
            .get(organization_id)
            .cloned()
            .ok_or_else(|| not_found("organization", organization_id))
    }

    async fn update_organization_metadata(
        &self,
        organization_id: &str,
        metadata: &OrganizationMetadata,
    ) -> Result<()> {
        let mut organizations = self.organizations.lock().unwrap();
        let organization =
            organizations.get_mut(organization_id).ok_or_else(|| not_found("organization", organization_id))?;
        organization.metadata = metadata.clone();
        Ok(())
    }

    async fn list_contracts(&self, _workgroup_id: &str, contract_type: &str) -> Result<Vec<Contract>> {
        Ok(self
            .contracts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contract_type == contract_type)
            .cloned()
            .collect())
    }

    async fn create_subject_account(
        &self,
        _organization_id: &str,
        account: &SubjectAccount,
    ) -> Result<SubjectAccount> {
        self.subject_creates.fetch_add(1, Ordering::SeqCst);
        self.subject_accounts
            .lock()
            .unwrap()
            .insert(account.id.to_string(), account.clone());
        Ok(account.clone())
    }

    async fn get_subject_account(
        &self,
        _organization_id: &str,
        id: &SubjectAccountId,
    ) -> Result<SubjectAccount> {
        self.subject_accounts
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| not_found("subject account", id.as_str()))
    }

    async fn create_invitation(&self, request: &InvitationRequest) -> Result<()> {
        self.invitations.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn api_status(&self) -> Result<()> {
        if self.never_healthy {
            return Err(StackError::platform("status", Some(503), "starting"));
        }
        let remaining = self.unhealthy_polls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unhealthy_polls.store(remaining - 1, Ordering::SeqCst);
            return Err(StackError::platform("status", Some(503), "starting"));
        }
        Ok(())
    }
}

fn fast_options() -> BootstrapOptions {
    BootstrapOptions {
        api_health_timeout: Duration::from_secs(5),
        contract_timeout: Duration::from_secs(5),
        contract_poll_interval: Duration::from_millis(10),
    }
}

fn bootstrap(platform: &Arc<MockPlatform>, context: OrganizationContext) -> OrganizationBootstrap {
    OrganizationBootstrap::new(platform.clone(), Arc::new(context), fast_options())
}

fn params(organization_id: &str, workgroup_id: &str) -> InvitationParams {
    InvitationParams {
        invitor_organization_address: Some("0x0000000000000000000000000000000000000001".to_string()),
        registry_contract_address: Some(REGISTRY_ADDRESS.to_string()),
        workgroup_id: workgroup_id.to_string(),
        invitor_subject_account_id: SubjectAccountId::derive(organization_id, workgroup_id),
    }
}

fn claims() -> InvitationClaims {
    let issued_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    InvitationClaims::new("org-1", "nats://org-1.example:4222", "bob@example.com", issued_at, params("org-1", "wg-1"))
}

/// Sign claims locally under an arbitrary `kid`.
fn sign_with(key: &RsaPrivateKey, kid: Option<&str>, claims: &InvitationClaims) -> String {
    let header = JwtHeader {
        alg: ALGORITHM.to_string(),
        kid: kid.map(str::to_string),
        typ: "JWT".to_string(),
    };
    let input = signing_input(&header, claims).unwrap();
    let signature = rsa_sign_with(key, input.as_bytes());
    format!("{}.{}", input, URL_SAFE_NO_PAD.encode(signature))
}

fn sign_locally(kid: Option<&str>, claims: &InvitationClaims) -> String {
    sign_with(signing_key(), kid, claims)
}

fn trusting_verifier() -> InvitationVerifier {
    let mut verifier = InvitationVerifier::new();
    verifier.trust_pem(&public_pem()).unwrap();
    verifier
}

#[tokio::test]
async fn test_vault_and_keys_converge() {
    let platform = Arc::new(MockPlatform::default());
    let provisioner = KeyProvisioner::new(platform.clone(), "org-1");

    let first = provisioner.require_vault().await.unwrap();
    let second = provisioner.require_vault().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(platform.vault_creates.load(Ordering::SeqCst), 1);

    let key = provisioner.require_keypair(&first.id, KeySpec::Rsa4096).await.unwrap();
    let again = provisioner.require_keypair(&first.id, KeySpec::Rsa4096).await.unwrap();
    assert_eq!(key.id, again.id);
    assert_eq!(platform.key_creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_key_provisioning_is_best_effort() {
    let platform = Arc::new(MockPlatform { failing_specs: vec!["BIP39"], ..Default::default() });
    let provisioner = KeyProvisioner::new(platform.clone(), "org-1");
    let vault = provisioner.require_vault().await.unwrap();

    let keys = provisioner.require_keypairs(&vault.id, &KeySpec::ALL).await;
    assert_eq!(keys.len(), 3);
    assert!(keys.contains_key("secp256k1"));
    assert!(keys.contains_key("RSA-4096"));
    assert!(!keys.contains_key("BIP39"));
}

#[tokio::test]
async fn test_bootstrap_creates_subject_account_once() {
    let platform = Arc::new(MockPlatform::with_organization("org-1", OrganizationMetadata::default()));
    platform.deploy_registry("wg-1");
    platform.unhealthy_polls.store(2, Ordering::SeqCst);

    let outcome = bootstrap(&platform, OrganizationContext::new("org-1", "wg-1")).run().await.unwrap();
    assert!(outcome.subject_account_created);
    assert_eq!(outcome.registry_contract_address.as_deref(), Some(REGISTRY_ADDRESS));
    assert_eq!(outcome.keys.len(), 4);

    // Any party can compute the id from the two public identifiers
    let expected = hex::encode(Sha256::digest(b"org-1.wg-1"));
    assert_eq!(outcome.subject_account.id.as_str(), expected);
    assert_eq!(outcome.subject_account.metadata.registry_contract_address.as_deref(), Some(REGISTRY_ADDRESS));

    let metadata = platform.metadata("org-1");
    let workgroup = &metadata.workgroups["wg-1"];
    assert_eq!(workgroup.vault_id.as_deref(), Some(outcome.vault.id.as_str()));
    assert!(workgroup.consent(ConsentKind::TermsOfService).is_some());
    assert!(workgroup.consent(ConsentKind::PrivacyPolicy).is_some());
    assert!(metadata.address.is_some());

    let rerun = bootstrap(&platform, OrganizationContext::new("org-1", "wg-1")).run().await.unwrap();
    assert!(!rerun.subject_account_created);
    assert_eq!(rerun.subject_account.id, outcome.subject_account.id);
    assert_eq!(rerun.vault.id, outcome.vault.id);
    assert_eq!(platform.subject_creates.load(Ordering::SeqCst), 1);
    assert_eq!(platform.vault_creates.load(Ordering::SeqCst), 1);
    assert_eq!(platform.key_creates.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_bootstrap_continues_without_registry_contract() {
    let platform = Arc::new(MockPlatform::with_organization("org-1", OrganizationMetadata::default()));
    let mut options = fast_options();
    options.contract_timeout = Duration::from_millis(50);

    let outcome = OrganizationBootstrap::new(
        platform.clone(),
        Arc::new(OrganizationContext::new("org-1", "wg-1")),
        options,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.registry_contract_address, None);
    assert!(outcome.subject_account_created);
}

#[tokio::test]
async fn test_bootstrap_fails_when_api_never_healthy() {
    let platform = Arc::new(MockPlatform {
        never_healthy: true,
        ..MockPlatform::with_organization("org-1", OrganizationMetadata::default())
    });
    let mut options = fast_options();
    options.api_health_timeout = Duration::from_millis(100);

    let err = OrganizationBootstrap::new(
        platform.clone(),
        Arc::new(OrganizationContext::new("org-1", "wg-1")),
        options,
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, StackError::ApiUnhealthy { .. }));
    assert_eq!(platform.subject_creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_participant_keeps_no_shared_secrets() {
    let mut metadata = OrganizationMetadata::default();
    metadata.workgroups.insert(
        "wg-1".to_string(),
        WorkgroupMetadata {
            operator_separation_degree: 1,
            system_secret_ids: vec!["secret-1".to_string()],
            ..Default::default()
        },
    );
    let platform = Arc::new(MockPlatform::with_organization("org-2", metadata));

    let context = OrganizationContext::new("org-2", "wg-1")
        .with_separation_degree(1)
        .with_registry_contract(Some(REGISTRY_ADDRESS.to_string()));
    bootstrap(&platform, context).run().await.unwrap();

    let workgroup = &platform.metadata("org-2").workgroups["wg-1"];
    assert!(workgroup.system_secret_ids.is_empty());
    assert!(platform.contracts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_vended_invitation_verifies_and_is_deterministic() {
    let platform = Arc::new(MockPlatform::default());
    let provisioner = KeyProvisioner::new(platform.clone(), "org-1");
    let vault = provisioner.require_vault().await.unwrap();
    let vendor = InvitationVendor::new(platform.clone(), provisioner);

    let grant = MessagingPermissions::compose(
        SubjectPermissions { allow: vec!["baseline.>".to_string()], deny: vec![] },
        SubjectPermissions::default(),
        SubjectPermissions::default(),
    );
    let claims = claims().with_permissions(grant);

    let token = vendor.vend(&vault.id, &claims).await.unwrap();
    let again = vendor.vend(&vault.id, &claims).await.unwrap();
    assert_eq!(token, again);
    assert_eq!(token.split('.').count(), 3);
    assert!(!token.contains('='));

    let verified = trusting_verifier().verify(&token).unwrap();
    assert!(verified.kid_matched);
    assert_eq!(verified.fingerprint, fingerprint::fingerprint_pem(&public_pem()).unwrap());
    assert_eq!(verified.invitor_organization_id, "org-1");
    assert_eq!(verified.claims, claims);

    let participant = verified.participant_context("org-2");
    assert_eq!(participant.workgroup_id, "wg-1");
    assert_eq!(participant.operator_separation_degree, 1);
    assert_eq!(participant.registry_contract_address.as_deref(), Some(REGISTRY_ADDRESS));
}

#[tokio::test]
async fn test_vend_without_permissions_omits_grant() {
    let platform = Arc::new(MockPlatform::default());
    let provisioner = KeyProvisioner::new(platform.clone(), "org-1");
    let vault = provisioner.require_vault().await.unwrap();
    let vendor = InvitationVendor::new(platform.clone(), provisioner);

    let token = vendor.vend(&vault.id, &claims()).await.unwrap();
    let payload = URL_SAFE_NO_PAD.decode(token.split('.').nth(1).unwrap()).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert!(json.get("nats").is_none());
    assert_eq!(json["iss"], "organization:org-1");
}

#[test]
fn test_unknown_kid_falls_back_to_most_recent_key() {
    let token = sign_locally(Some("00:11:22"), &claims());
    let verified = trusting_verifier().verify(&token).unwrap();
    assert!(!verified.kid_matched);

    let token = sign_locally(None, &claims());
    assert!(!trusting_verifier().verify(&token).unwrap().kid_matched);
}

#[test]
fn test_unknown_kid_uses_most_recently_trusted_key() {
    let mut verifier = InvitationVerifier::new();
    let original = verifier.trust_pem(&public_pem()).unwrap();
    let rotated = verifier.trust_pem(&pem_of(rotated_key())).unwrap();
    assert_ne!(original, rotated);

    let token = sign_with(rotated_key(), Some("00:11:22"), &claims());
    let verified = verifier.verify(&token).unwrap();
    assert!(!verified.kid_matched);
    assert_eq!(verified.fingerprint, rotated);

    // The older key is never the fallback
    let token = sign_with(signing_key(), Some("00:11:22"), &claims());
    let err = verifier.verify(&token).unwrap_err();
    assert!(matches!(err, StackError::InvalidToken { ref reason } if reason == "signature mismatch"));

    // but is still selected when named
    let token = sign_with(signing_key(), Some(&original), &claims());
    let verified = verifier.verify(&token).unwrap();
    assert!(verified.kid_matched);
    assert_eq!(verified.fingerprint, original);
}

#[test]
fn test_tampered_token_rejected() {
    let token = sign_locally(None, &claims());
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();

    let mut forged = claims();
    forged.sub = "mallory@example.com".to_string();
    parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

    let err = trusting_verifier().verify(&parts.join(".")).unwrap_err();
    assert!(matches!(err, StackError::InvalidToken { .. }));
}

#[test]
fn test_mismatched_subject_account_rejected() {
    let mut claims = claims();
    claims.prvd.data.params.invitor_subject_account_id = SubjectAccountId::derive("org-9", "wg-1");
    let token = sign_locally(None, &claims);

    let err = trusting_verifier().verify(&token).unwrap_err();
    assert!(err.to_string().contains("subject account"));
}

#[test]
fn test_verifier_without_keys_rejects() {
    let token = sign_locally(None, &claims());
    assert!(InvitationVerifier::new().verify(&token).is_err());
}

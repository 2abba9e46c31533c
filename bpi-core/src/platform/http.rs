//! HTTP implementation of the platform boundary.

use super::{
    Contract, InvitationRequest, Key, KeySpec, Organization, PlatformApi, SignOptions,
    SubjectAccount, Vault,
};
use crate::error::{Result, StackError};
use crate::subject::SubjectAccountId;
use crate::types::OrganizationMetadata;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PREVIEW_LEN: usize = 256;

/// Query parameters, percent-encoded by the client.
type Query<'a> = &'a [(&'a str, &'a str)];

const NO_QUERY: Query<'static> = &[];

/// Base URLs of the platform services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEndpoints {
    pub ident: String,
    pub vault: String,
    pub nchain: String,

    /// The protocol API of the local stack
    pub api: String,
}

/// Platform client authenticating with a bearer token.
#[derive(Clone)]
pub struct HttpPlatformClient {
    client: Client,
    endpoints: PlatformEndpoints,
    token: Option<String>,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

impl HttpPlatformClient {
    pub fn new(endpoints: PlatformEndpoints, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StackError::InvalidConfig { reason: format!("HTTP client: {}", e) })?;
        Ok(Self { client, endpoints, token })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn request<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: String,
        query: Query<'_>,
        body: Option<&B>,
    ) -> Result<R> {
        let text = self.send(operation, method, url, query, body).await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            StackError::platform(operation, None, format!("invalid response: {}", e))
        })
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        method: Method,
        url: String,
        query: Query<'_>,
        body: Option<&B>,
    ) -> Result<String> {
        debug!(operation, %method, url = %url, "Platform request");

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StackError::platform(operation, None, e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            StackError::platform(operation, Some(status.as_u16()), format!("read body: {}", e))
        })?;

        if status == StatusCode::NOT_FOUND {
            return Err(StackError::NotFound { resource: operation.to_string(), id: url });
        }
        if !status.is_success() {
            let preview: String = text.chars().take(PREVIEW_LEN).collect();
            return Err(StackError::platform(operation, Some(status.as_u16()), preview));
        }
        Ok(text)
    }

    fn ident(&self, path: &str) -> String {
        Self::url(&self.endpoints.ident, path)
    }

    fn vault(&self, path: &str) -> String {
        Self::url(&self.endpoints.vault, path)
    }

    fn nchain(&self, path: &str) -> String {
        Self::url(&self.endpoints.nchain, path)
    }

    fn api(&self, path: &str) -> String {
        Self::url(&self.endpoints.api, path)
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn list_vaults(&self, organization_id: &str) -> Result<Vec<Vault>> {
        let query = [("organization_id", organization_id)];
        self.request("list_vaults", Method::GET, self.vault("api/v1/vaults"), &query, None::<&()>)
            .await
    }

    async fn create_vault(
        &self,
        organization_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Vault> {
        let body = json!({
            "organization_id": organization_id,
            "name": name,
            "description": description,
        });
        self.request("create_vault", Method::POST, self.vault("api/v1/vaults"), NO_QUERY, Some(&body))
            .await
    }

    async fn list_keys(&self, vault_id: &str, spec: KeySpec) -> Result<Vec<Key>> {
        let url = self.vault(&format!("api/v1/vaults/{}/keys", vault_id));
        let query = [("spec", spec.as_str())];
        self.request("list_keys", Method::GET, url, &query, None::<&()>).await
    }

    async fn create_key(&self, vault_id: &str, spec: KeySpec, name: &str) -> Result<Key> {
        let body = json!({
            "name": name,
            "description": spec.default_name(),
            "spec": spec.as_str(),
            "type": "asymmetric",
            "usage": "sign/verify",
        });
        let url = self.vault(&format!("api/v1/vaults/{}/keys", vault_id));
        self.request("create_key", Method::POST, url, NO_QUERY, Some(&body)).await
    }

    async fn sign(
        &self,
        vault_id: &str,
        key_id: &str,
        message_hex: &str,
        options: &SignOptions,
    ) -> Result<String> {
        let body = json!({ "message": message_hex, "options": options });
        let url = self.vault(&format!("api/v1/vaults/{}/keys/{}/sign", vault_id, key_id));
        let response: SignResponse = self
            .request("sign", Method::POST, url, NO_QUERY, Some(&body))
            .await
            .map_err(|e| StackError::SigningFailed { reason: e.to_string() })?;
        Ok(response.signature)
    }

    async fn get_organization(&self, organization_id: &str) -> Result<Organization> {
        let url = self.ident(&format!("api/v1/organizations/{}", organization_id));
        self.request("get_organization", Method::GET, url, NO_QUERY, None::<&()>).await
    }

    async fn update_organization_metadata(
        &self,
        organization_id: &str,
        metadata: &OrganizationMetadata,
    ) -> Result<()> {
        let body = json!({ "metadata": metadata });
        let url = self.ident(&format!("api/v1/organizations/{}", organization_id));
        self.send("update_organization", Method::PUT, url, NO_QUERY, Some(&body)).await?;
        Ok(())
    }

    async fn list_contracts(&self, workgroup_id: &str, contract_type: &str) -> Result<Vec<Contract>> {
        let query = [("application_id", workgroup_id), ("type", contract_type)];
        self.request("list_contracts", Method::GET, self.nchain("api/v1/contracts"), &query, None::<&()>)
            .await
    }

    async fn create_subject_account(
        &self,
        organization_id: &str,
        account: &SubjectAccount,
    ) -> Result<SubjectAccount> {
        let url = self.api(&format!("api/v1/subjects/{}/accounts", organization_id));
        self.request("create_subject_account", Method::POST, url, NO_QUERY, Some(account)).await
    }

    async fn get_subject_account(
        &self,
        organization_id: &str,
        id: &SubjectAccountId,
    ) -> Result<SubjectAccount> {
        let url = self.api(&format!("api/v1/subjects/{}/accounts/{}", organization_id, id));
        self.request("get_subject_account", Method::GET, url, NO_QUERY, None::<&()>).await
    }

    async fn create_invitation(&self, request: &InvitationRequest) -> Result<()> {
        let url = self.ident("api/v1/invitations");
        self.send("create_invitation", Method::POST, url, NO_QUERY, Some(request)).await?;
        Ok(())
    }

    async fn api_status(&self) -> Result<()> {
        self.send("api_status", Method::GET, self.api("status"), NO_QUERY, None::<&()>).await?;
        Ok(())
    }
}

//! # Credential Delivery
//!
//! Pushes issued credentials to the holder's storage API, the
//! `CredentialService` endpoint of the holder's DID document, as a DCP
//! `CredentialMessage` authenticated with a self-issued token (issuer and
//! subject are the issuer's DID, audience the holder's).

use std::sync::Arc;

use async_trait::async_trait;
use dcp_core::{SharedClock, SystemClock};
use dcp_protocol::{
    CredentialContainer, CredentialMessage, CredentialRequestStatus, DidResolver, HttpClient,
    HttpRequest, ProtocolError, SecureTokenService, TokenClaims, CREDENTIAL_SERVICE_TYPE,
};
use dcp_vc::VerifiableCredentialContainer;
use serde_json::Value;

use crate::process::IssuanceProcess;

#[async_trait]
pub trait CredentialStorageClient: Send + Sync {
    async fn deliver(
        &self,
        process: &IssuanceProcess,
        holder_did: &str,
        credentials: &[VerifiableCredentialContainer],
    ) -> Result<(), ProtocolError>;
}

pub struct DcpCredentialStorageClient {
    resolver: Arc<dyn DidResolver>,
    http: Arc<dyn HttpClient>,
    sts: Arc<dyn SecureTokenService>,
    own_did: String,
    clock: SharedClock,
}

impl DcpCredentialStorageClient {
    pub fn new(
        resolver: Arc<dyn DidResolver>,
        http: Arc<dyn HttpClient>,
        sts: Arc<dyn SecureTokenService>,
        own_did: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            http,
            sts,
            own_did: own_did.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    async fn storage_endpoint(&self, holder_did: &str) -> Result<String, ProtocolError> {
        let document = self.resolver.resolve(holder_did).await?;
        document
            .find_service(CREDENTIAL_SERVICE_TYPE)
            .map(|s| s.service_endpoint.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ProtocolError::Resolution(format!(
                    "No '{CREDENTIAL_SERVICE_TYPE}' endpoint found on the DID Document of '{holder_did}'"
                ))
            })
    }
}

pub(crate) fn credential_message(
    process: &IssuanceProcess,
    credentials: &[VerifiableCredentialContainer],
) -> CredentialMessage {
    CredentialMessage {
        issuer_pid: process.entity.id.clone(),
        holder_pid: process.holder_pid.clone(),
        credentials: credentials
            .iter()
            .map(|c| CredentialContainer {
                credential_type: c
                    .credential
                    .primary_type()
                    .unwrap_or("VerifiableCredential")
                    .to_string(),
                format: c.format.to_string(),
                payload: Value::String(c.raw_vc.clone()),
            })
            .collect(),
        status: CredentialRequestStatus::Issued.to_string(),
    }
}

#[async_trait]
impl CredentialStorageClient for DcpCredentialStorageClient {
    async fn deliver(
        &self,
        process: &IssuanceProcess,
        holder_did: &str,
        credentials: &[VerifiableCredentialContainer],
    ) -> Result<(), ProtocolError> {
        let endpoint = self.storage_endpoint(holder_did).await?;
        let claims = TokenClaims::self_issued(&self.own_did, holder_did, self.clock.now());
        let token = self.sts.create_token(&claims, None).await?.token;
        let body = serde_json::to_value(credential_message(process, credentials))?;

        self.http
            .execute(HttpRequest::post_json(format!("{endpoint}/credentials"), body).with_bearer(token))
            .await
            .map_err(|e| ProtocolError::Http(format!("Credential Message failed: {}", e.message())))?;
        tracing::debug!(
            entity_id = %process.entity.id,
            holder = %holder_did,
            count = credentials.len(),
            "credentials delivered"
        );
        Ok(())
    }
}

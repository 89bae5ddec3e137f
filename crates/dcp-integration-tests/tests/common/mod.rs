//! A holder node and an issuer node wired to each other through an
//! in-process HTTP loopback.
//!
//! The loopback plays the part of each node's HTTP API: it authenticates the
//! bearer token, decodes the DCP message and calls the node's entry point.
//! Status list credentials are served without authentication.
//! Nodes are driven by [`Node::tick`], never by background loops.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dcp_core::{FixedClock, ServiceError};
use dcp_node::{Collaborators, Node, NodeConfig, StoreBackend};
use dcp_protocol::testing::{FakeTokenService, StaticDidResolver};
use dcp_protocol::{
    CredentialMessage, CredentialRequestMessage, DidDocument, DidResolver, HttpClient, HttpMethod,
    HttpRequest, HttpResponse, ProtocolError, Service, TokenVerifier, CREDENTIAL_SERVICE_TYPE,
};
use dcp_vc::VerifiableCredential;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

pub const HOLDER_DID: &str = "did:web:holder.example";
pub const ISSUER_DID: &str = "did:web:issuer.example";
pub const HOLDER_PARTICIPANT: &str = "holder";
pub const ISSUER_PARTICIPANT: &str = "issuer";
pub const ISSUER_ENDPOINT: &str = "https://issuer.example/api/issuance";
pub const HOLDER_ENDPOINT: &str = "https://holder.example/api/storage";
pub const STATUS_ENDPOINT: &str = "https://issuer.example/api/status";

const HOLDER_CONFIG: &str = r#"
participant_context_id: holder
own_did: did:web:holder.example
instance_id: holder-node
sts:
  token_url: https://sts.holder.example/token
  client_id: holder
  client_secret: unused
"#;

const ISSUER_CONFIG: &str = r#"
participant_context_id: issuer
own_did: did:web:issuer.example
instance_id: issuer-node
sts:
  token_url: https://sts.issuer.example/token
  client_id: issuer
  client_secret: unused
holder:
  enabled: false
issuer:
  enabled: true
  holders:
    - holderId: holder-1
      did: did:web:holder.example
  attestations:
    - id: membership-presented
      attestationType: presentation
      configuration:
        credentialType: MembershipCredential
        outputClaim: membership
  credential_definitions:
    - id: gold-tier
      credentialType: GoldTierCredential
      format: VC1_0_JWT
      validity: 86400
      attestations: [membership-presented]
      rules:
        - type: expression
          configuration: { claim: membership.tier, operator: eq, value: gold }
      mappings:
        - { input: membership.tier, output: credentialSubject.tier }
        - { input: membership.since, output: credentialSubject.memberSince }
  status_list:
    base_url: https://issuer.example/api/status
    bitstring_size: 1024
"#;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// DID documents for both participants.
pub fn documents() -> StaticDidResolver {
    StaticDidResolver::new()
        .with_document(DidDocument::new(ISSUER_DID).with_service(Service::new(
            format!("{ISSUER_DID}#issuer"),
            "IssuerService",
            ISSUER_ENDPOINT,
        )))
        .with_document(DidDocument::new(HOLDER_DID).with_service(Service::new(
            format!("{HOLDER_DID}#storage"),
            CREDENTIAL_SERVICE_TYPE,
            HOLDER_ENDPOINT,
        )))
}

/// The membership credential the holder presents with every request.
pub fn membership(tier: &str) -> VerifiableCredential {
    serde_json::from_value(json!({
        "id": "urn:uuid:membership-1",
        "type": ["VerifiableCredential", "MembershipCredential"],
        "issuer": "did:web:registry.example",
        "issuanceDate": "2023-01-01T00:00:00Z",
        "credentialSubject": {"id": HOLDER_DID, "tier": tier, "since": "2023-01-01"}
    }))
    .unwrap()
}

// ---- Loopback ----

pub struct Loopback {
    holder: OnceLock<Arc<Node>>,
    issuer: OnceLock<Arc<Node>>,
    tokens: Arc<FakeTokenService>,
    presented: RwLock<Vec<VerifiableCredential>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Loopback {
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Replace the credentials presented with holder requests.
    pub fn present(&self, credentials: Vec<VerifiableCredential>) {
        *self.presented.write() = credentials;
    }

    fn issuer(&self) -> Result<&Arc<Node>, ProtocolError> {
        self.issuer
            .get()
            .ok_or_else(|| ProtocolError::Http("connection refused".into()))
    }

    fn holder(&self) -> Result<&Arc<Node>, ProtocolError> {
        self.holder
            .get()
            .ok_or_else(|| ProtocolError::Http("connection refused".into()))
    }

    async fn issuer_api(&self, request: &HttpRequest, path: &str) -> Result<HttpResponse, ProtocolError> {
        let node = self.issuer()?;
        let role = node.issuer.as_ref().ok_or_else(|| http_error(404, "no issuer"))?;
        let verifier: Arc<dyn TokenVerifier> = self.tokens.clone();
        let context = role
            .authenticator(verifier)
            .authenticate(request.bearer_token.as_deref().unwrap_or_default())
            .await
            .map_err(service_error)?
            .with_credentials(self.presented.read().clone());

        match (request.method, path.strip_prefix("/request/")) {
            (HttpMethod::Post, None) if path == "/credentials" => {
                let message: CredentialRequestMessage = decode(request)?;
                let pid = role
                    .service
                    .initiate_credentials_issuance(node.participant_context_id(), &message, &context)
                    .await
                    .map_err(service_error)?;
                Ok(HttpResponse::ok(pid))
            }
            (HttpMethod::Get, Some(pid)) => {
                let status = role
                    .service
                    .credential_status(node.participant_context_id(), &context.holder.did, pid)
                    .await
                    .map_err(service_error)?;
                Ok(HttpResponse::ok(serde_json::to_string(&status)?))
            }
            _ => Err(http_error(404, path)),
        }
    }

    async fn status_api(&self, request: &HttpRequest, path: &str) -> Result<HttpResponse, ProtocolError> {
        let node = self.issuer()?;
        let lists = node
            .issuer
            .as_ref()
            .and_then(|role| role.status_lists.as_ref())
            .ok_or_else(|| http_error(404, "no status lists"))?;
        let list_id = path.strip_prefix('/').unwrap_or(path);
        if request.method != HttpMethod::Get || list_id.is_empty() {
            return Err(http_error(404, path));
        }
        let body = lists.list_credential(list_id).await.map_err(service_error)?;
        Ok(HttpResponse::ok(body))
    }

    async fn storage_api(&self, request: &HttpRequest, path: &str) -> Result<HttpResponse, ProtocolError> {
        let node = self.holder()?;
        let role = node.holder.as_ref().ok_or_else(|| http_error(404, "no holder"))?;
        let token = request.bearer_token.as_deref().unwrap_or_default();
        self.tokens
            .verify(token, HOLDER_DID)
            .await
            .map_err(|e| http_error(401, e.message()))?;

        if request.method != HttpMethod::Post || path != "/credentials" {
            return Err(http_error(404, path));
        }
        let message: CredentialMessage = decode(request)?;
        role.writer
            .write(
                &message.holder_pid,
                &message.issuer_pid,
                &message.credentials,
                node.participant_context_id(),
            )
            .await
            .map_err(service_error)?;
        Ok(HttpResponse::ok(""))
    }
}

#[async_trait]
impl HttpClient for Loopback {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        self.requests.lock().push(request.clone());
        if let Some(path) = request.url.strip_prefix(ISSUER_ENDPOINT) {
            self.issuer_api(&request, path).await
        } else if let Some(path) = request.url.strip_prefix(HOLDER_ENDPOINT) {
            self.storage_api(&request, path).await
        } else if let Some(path) = request.url.strip_prefix(STATUS_ENDPOINT) {
            self.status_api(&request, path).await
        } else {
            Err(ProtocolError::Http(format!("unknown host: {}", request.url)))
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> Result<T, ProtocolError> {
    let body = request.body.clone().ok_or_else(|| http_error(400, "empty body"))?;
    serde_json::from_value(body).map_err(|e| http_error(400, &e.to_string()))
}

fn http_error(status: u16, message: &str) -> ProtocolError {
    ProtocolError::Http(format!("HTTP {status}: {message}"))
}

fn service_error(e: ServiceError) -> ProtocolError {
    let status = match e {
        ServiceError::BadRequest(_) => 400,
        ServiceError::Unauthorized(_) => 401,
        ServiceError::NotFound(_) => 404,
        ServiceError::Conflict(_) => 409,
        _ => 500,
    };
    http_error(status, e.message())
}

// ---- Deployment ----

pub struct Deployment {
    pub holder: Arc<Node>,
    pub issuer: Arc<Node>,
    pub network: Arc<Loopback>,
    pub tokens: Arc<FakeTokenService>,
    pub clock: Arc<FixedClock>,
}

impl Deployment {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(documents()))
    }

    pub fn with_resolver(resolver: Arc<dyn DidResolver>) -> Self {
        let clock = Arc::new(FixedClock::new(start_time()));
        let tokens = FakeTokenService::new().shared();
        let network = Arc::new(Loopback {
            holder: OnceLock::new(),
            issuer: OnceLock::new(),
            tokens: Arc::clone(&tokens),
            presented: RwLock::new(vec![membership("gold")]),
            requests: Mutex::new(Vec::new()),
        });
        let collaborators = Collaborators {
            resolver,
            http: network.clone(),
            sts: tokens.clone(),
            clock: clock.clone(),
        };

        let holder = Arc::new(build(HOLDER_CONFIG, collaborators.clone()));
        let issuer = Arc::new(build(ISSUER_CONFIG, collaborators));
        let _ = network.holder.set(Arc::clone(&holder));
        let _ = network.issuer.set(Arc::clone(&issuer));

        Self {
            holder,
            issuer,
            network,
            tokens,
            clock,
        }
    }
}

fn build(raw: &str, collaborators: Collaborators) -> Node {
    let config = NodeConfig::from_yaml(raw).unwrap();
    config.validate().unwrap();
    Node::build(&config, &StoreBackend::Memory, collaborators).unwrap()
}

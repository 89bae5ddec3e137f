//! Recording fakes for the collaborator traits.
//!
//! Every fake records its calls so tests can assert on what was (or was
//! not) invoked and in which order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::did::{DidDocument, DidResolver};
use crate::error::ProtocolError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::token::{SecureTokenService, TokenClaims, TokenRepresentation, TokenVerifier};

/// Resolves DIDs from a fixed table. Unknown DIDs fail with
/// `"DID '<did>' not found"`.
#[derive(Default)]
pub struct StaticDidResolver {
    documents: Mutex<HashMap<String, Result<DidDocument, ProtocolError>>>,
    calls: Mutex<Vec<String>>,
}

impl StaticDidResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, document: DidDocument) -> Self {
        self.documents
            .lock()
            .insert(document.id.clone(), Ok(document));
        self
    }

    pub fn with_failure(self, did: impl Into<String>, message: impl Into<String>) -> Self {
        self.documents
            .lock()
            .insert(did.into(), Err(ProtocolError::Resolution(message.into())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DidResolver for StaticDidResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument, ProtocolError> {
        self.calls.lock().push(did.to_string());
        self.documents
            .lock()
            .get(did)
            .cloned()
            .unwrap_or_else(|| Err(ProtocolError::Resolution(format!("DID '{did}' not found"))))
    }
}

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, ProtocolError> + Send + Sync;

/// Answers every request with a caller-supplied function and records it.
pub struct RecordingHttpClient {
    responder: Box<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingHttpClient {
    pub fn new(
        responder: impl Fn(&HttpRequest) -> Result<HttpResponse, ProtocolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with `200` and `body`.
    pub fn always_ok(body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(move |_| Ok(HttpResponse::ok(body.clone())))
    }

    /// Fails every request with `message`.
    pub fn always_failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(ProtocolError::Http(message.clone())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpClient for RecordingHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let result = (self.responder)(&request);
        self.requests.lock().push(request);
        result
    }
}

/// Token prefix of [`FakeTokenService`] tokens.
const FAKE_TOKEN_PREFIX: &str = "fake.";

/// Mints unsigned tokens (`fake.` + claims JSON) and verifies its own tokens.
#[derive(Default)]
pub struct FakeTokenService {
    failure: Option<String>,
    minted: Mutex<Vec<TokenClaims>>,
}

impl FakeTokenService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            minted: Mutex::new(Vec::new()),
        }
    }

    pub fn minted(&self) -> Vec<TokenClaims> {
        self.minted.lock().clone()
    }

    pub fn mint_count(&self) -> usize {
        self.minted.lock().len()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SecureTokenService for FakeTokenService {
    async fn create_token(
        &self,
        claims: &TokenClaims,
        _key_id: Option<&str>,
    ) -> Result<TokenRepresentation, ProtocolError> {
        self.minted.lock().push(claims.clone());
        if let Some(message) = &self.failure {
            return Err(ProtocolError::Token(message.clone()));
        }
        Ok(TokenRepresentation {
            token: format!("{FAKE_TOKEN_PREFIX}{}", serde_json::to_string(claims)?),
            expires_in: Some(claims.exp - claims.iat),
        })
    }
}

#[async_trait]
impl TokenVerifier for FakeTokenService {
    async fn verify(&self, token: &str, audience: &str) -> Result<TokenClaims, ProtocolError> {
        let json = token
            .strip_prefix(FAKE_TOKEN_PREFIX)
            .ok_or_else(|| ProtocolError::Token("malformed token".into()))?;
        let claims: TokenClaims = serde_json::from_str(json)
            .map_err(|e| ProtocolError::Token(format!("malformed token: {e}")))?;
        if claims.aud != audience {
            return Err(ProtocolError::Token(format!(
                "token audience '{}' does not match '{audience}'",
                claims.aud
            )));
        }
        Ok(claims)
    }
}

//! # Self-Issued Tokens
//!
//! DCP participants authenticate to each other with short-lived bearer
//! tokens minted by a Secure Token Service: issuer and subject are the
//! caller's own DID, audience is the counterparty's DID.
//!
//! Signing is the token service's concern. [`RemoteSecureTokenService`]
//! obtains tokens from an OAuth2 client-credentials endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Default lifetime of a self-issued token.
pub const DEFAULT_TOKEN_VALIDITY_SECS: i64 = 300;

/// Claims of a self-issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TokenClaims {
    /// Claims for a token about `own_did`, addressed to `audience`, valid
    /// for [`DEFAULT_TOKEN_VALIDITY_SECS`] from `now`.
    pub fn self_issued(own_did: &str, audience: &str, now: DateTime<Utc>) -> Self {
        Self {
            iss: own_did.to_string(),
            sub: own_did.to_string(),
            aud: audience.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + DEFAULT_TOKEN_VALIDITY_SECS,
            jti: Uuid::new_v4().to_string(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// A minted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRepresentation {
    pub token: String,
    pub expires_in: Option<i64>,
}

/// Mints signed bearer tokens.
#[async_trait]
pub trait SecureTokenService: Send + Sync {
    async fn create_token(
        &self,
        claims: &TokenClaims,
        key_id: Option<&str>,
    ) -> Result<TokenRepresentation, ProtocolError>;
}

/// Verifies an inbound bearer token addressed to `audience` and returns its
/// claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str, audience: &str) -> Result<TokenClaims, ProtocolError>;
}

// ---- Remote STS ----

#[derive(Clone)]
pub struct RemoteStsConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for RemoteStsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStsConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// [`SecureTokenService`] backed by an OAuth2 client-credentials endpoint.
#[derive(Debug, Clone)]
pub struct RemoteSecureTokenService {
    client: reqwest::Client,
    config: RemoteStsConfig,
}

impl RemoteSecureTokenService {
    pub fn new(config: RemoteStsConfig) -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProtocolError::Token(format!("failed to build STS client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SecureTokenService for RemoteSecureTokenService {
    async fn create_token(
        &self,
        claims: &TokenClaims,
        key_id: Option<&str>,
    ) -> Result<TokenRepresentation, ProtocolError> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("audience", claims.aud.clone()),
        ];
        if let Some(kid) = key_id {
            form.push(("key_id", kid.to_string()));
        }
        for (name, value) in &claims.extra {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            form.push((name.as_str(), rendered));
        }

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProtocolError::Token(format!("STS request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProtocolError::Token(format!(
                "STS returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ProtocolError::Token(format!("invalid STS response: {e}")))?;
        Ok(TokenRepresentation {
            token: token.access_token,
            expires_in: token.expires_in,
        })
    }
}

//! # Holders and Request Authentication
//!
//! The issuer only serves holders it knows. A [`Holder`] is registered with
//! the DID it authenticates with; every inbound DCP call carries a
//! self-issued token whose issuer is that DID. [`HolderAuthenticator`]
//! verifies the token and resolves the holder into a [`RequestContext`],
//! the authenticated context the issuance entry points work with.

use std::collections::BTreeMap;
use std::sync::Arc;

use dcp_core::{ServiceError, ServiceResult, StoreError};
use dcp_protocol::{TokenClaims, TokenVerifier};
use dcp_vc::VerifiableCredential;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A participant this issuer issues credentials to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holder {
    pub holder_id: String,
    pub did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Holder {
    pub fn new(holder_id: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            holder_id: holder_id.into(),
            did: did.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// In-memory holder registry keyed by holder id. Clones share data.
#[derive(Debug, Clone, Default)]
pub struct HolderStore {
    data: Arc<RwLock<BTreeMap<String, Holder>>>,
}

impl HolderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, holder: Holder) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        if guard.contains_key(&holder.holder_id) || guard.values().any(|h| h.did == holder.did) {
            return Err(StoreError::AlreadyExists {
                id: holder.holder_id,
            });
        }
        guard.insert(holder.holder_id.clone(), holder);
        Ok(())
    }

    pub fn find_by_id(&self, holder_id: &str) -> Option<Holder> {
        self.data.read().get(holder_id).cloned()
    }

    pub fn find_by_did(&self, did: &str) -> Option<Holder> {
        self.data.read().values().find(|h| h.did == did).cloned()
    }

    pub fn delete_by_id(&self, holder_id: &str) -> Result<Holder, StoreError> {
        self.data.write().remove(holder_id).ok_or_else(|| StoreError::NotFound {
            id: holder_id.to_string(),
        })
    }

    pub fn list(&self) -> Vec<Holder> {
        self.data.read().values().cloned().collect()
    }
}

/// An authenticated inbound DCP call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub holder: Holder,
    pub token: TokenClaims,
    /// Credentials the holder presented alongside the request.
    pub credentials: Vec<VerifiableCredential>,
}

impl RequestContext {
    pub fn new(holder: Holder, token: TokenClaims) -> Self {
        Self {
            holder,
            token,
            credentials: Vec::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Vec<VerifiableCredential>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Turns a bearer token into a [`RequestContext`].
pub struct HolderAuthenticator {
    verifier: Arc<dyn TokenVerifier>,
    holders: HolderStore,
    own_did: String,
}

impl HolderAuthenticator {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        holders: HolderStore,
        own_did: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            holders,
            own_did: own_did.into(),
        }
    }

    /// Verify `bearer` (audience must be this issuer) and look up the
    /// holder by the token's issuer DID.
    pub async fn authenticate(&self, bearer: &str) -> ServiceResult<RequestContext> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer);
        let claims = self
            .verifier
            .verify(token, &self.own_did)
            .await
            .map_err(|e| ServiceError::Unauthorized(e.message().to_string()))?;
        let holder = self.holders.find_by_did(&claims.iss).ok_or_else(|| {
            tracing::debug!(did = %claims.iss, "token issuer is not a registered holder");
            ServiceError::Unauthorized("Participant not found".into())
        })?;
        Ok(RequestContext::new(holder, claims))
    }
}

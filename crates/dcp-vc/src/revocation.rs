//! # Revocation Registry
//!
//! A credential's revocation signal comes from the service registered for
//! the `type` of its `credentialStatus` entries (e.g. a status-list
//! implementation). The registry returns the first non-empty signal, such
//! as `"revocation"` or `"suspension"`.
//!
//! Credentials without a status entry, or whose status types have no
//! registered service, carry no signal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::credential::{CredentialStatusEntry, VerifiableCredential};

pub const REVOCATION: &str = "revocation";
pub const SUSPENSION: &str = "suspension";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RevocationError(pub String);

/// Checks one kind of `credentialStatus` entry.
#[async_trait]
pub trait RevocationService: Send + Sync {
    async fn check(
        &self,
        entry: &CredentialStatusEntry,
    ) -> Result<Option<String>, RevocationError>;
}

/// Returns the revocation signal for a credential, if any.
#[async_trait]
pub trait RevocationServiceRegistry: Send + Sync {
    async fn revocation_status(
        &self,
        credential: &VerifiableCredential,
    ) -> Result<Option<String>, RevocationError>;
}

/// [`RevocationServiceRegistry`] dispatching on status entry type.
#[derive(Default, Clone)]
pub struct RevocationRegistry {
    services: HashMap<String, Arc<dyn RevocationService>>,
}

impl RevocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, status_type: impl Into<String>, service: Arc<dyn RevocationService>) -> Self {
        self.services.insert(status_type.into(), service);
        self
    }
}

#[async_trait]
impl RevocationServiceRegistry for RevocationRegistry {
    async fn revocation_status(
        &self,
        credential: &VerifiableCredential,
    ) -> Result<Option<String>, RevocationError> {
        for entry in &credential.credential_status {
            let Some(service) = self.services.get(&entry.status_type) else {
                tracing::warn!(
                    status_type = %entry.status_type,
                    "no revocation service registered for credential status type"
                );
                continue;
            };
            if let Some(signal) = service.check(entry).await? {
                return Ok(Some(signal));
            }
        }
        Ok(None)
    }
}

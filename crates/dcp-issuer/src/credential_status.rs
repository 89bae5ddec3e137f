//! # Credential Status Service
//!
//! Operator entry points that revoke, suspend and resume credentials this
//! issuer has issued. Each flips the credential's bit in the status list
//! named by its `credentialStatus` entry for that purpose and records the
//! new status on the issuer's copy of the credential.
//!
//! Revocation is final: a revoked credential can be neither suspended nor
//! resumed. Revoking twice is a no-op.

use std::sync::Arc;

use dcp_core::{ServiceError, ServiceResult, SharedClock, Stateful, SystemClock};
use dcp_state::SharedStore;
use dcp_vc::{
    StatusListEntry, VcStatus, VerifiableCredentialResource, BITSTRING_STATUS_LIST_ENTRY,
    REVOCATION, SUSPENSION,
};
use serde_json::Value;

use crate::status_list::StatusListManager;

/// Metadata key holding the reason given for the last suspension or resumption.
pub const STATUS_REASON: &str = "statusReason";

pub struct CredentialStatusService {
    credentials: SharedStore<VerifiableCredentialResource>,
    lists: Arc<StatusListManager>,
    clock: SharedClock,
}

impl CredentialStatusService {
    pub fn new(credentials: SharedStore<VerifiableCredentialResource>, lists: Arc<StatusListManager>) -> Self {
        Self {
            credentials,
            lists,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn revoke(&self, credential_id: &str) -> ServiceResult<()> {
        let credential = self.credential(credential_id).await?;
        let entry = status_entry(&credential, REVOCATION)?;
        if !self.lists.set(&entry, true).await? {
            tracing::info!(entity_id = %credential_id, "credential already revoked");
        }
        self.record(credential_id, VcStatus::Revoked, None).await
    }

    pub async fn suspend(&self, credential_id: &str, reason: Option<&str>) -> ServiceResult<()> {
        let credential = self.credential(credential_id).await?;
        ensure_not_revoked(&credential)?;
        let entry = status_entry(&credential, SUSPENSION)?;
        self.lists.set(&entry, true).await?;
        self.record(credential_id, VcStatus::Suspended, reason).await
    }

    pub async fn resume(&self, credential_id: &str, reason: Option<&str>) -> ServiceResult<()> {
        let credential = self.credential(credential_id).await?;
        ensure_not_revoked(&credential)?;
        let entry = status_entry(&credential, SUSPENSION)?;
        self.lists.set(&entry, false).await?;

        let now = self.clock.now();
        let expired = credential
            .verifiable_credential
            .credential
            .expiration_date
            .is_some_and(|exp| now > exp);
        let status = if expired { VcStatus::Expired } else { VcStatus::Issued };
        self.record(credential_id, status, reason).await
    }

    /// The purpose whose bit is set for this credential, revocation first.
    pub async fn status(&self, credential_id: &str) -> ServiceResult<Option<String>> {
        let credential = self.credential(credential_id).await?;
        for purpose in [REVOCATION, SUSPENSION] {
            let Ok(entry) = status_entry(&credential, purpose) else {
                continue;
            };
            if self.lists.get(&entry).await? {
                return Ok(Some(purpose.to_string()));
            }
        }
        Ok(None)
    }

    async fn credential(&self, credential_id: &str) -> ServiceResult<VerifiableCredentialResource> {
        self.credentials
            .find_by_id(credential_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No credential with id '{credential_id}' found")))
    }

    async fn record(&self, credential_id: &str, status: VcStatus, reason: Option<&str>) -> ServiceResult<()> {
        let mut credential = self.credentials.find_by_id_and_lease(credential_id).await?;
        credential.set_status(status, self.clock.now());
        if let Some(reason) = reason {
            credential
                .metadata
                .insert(STATUS_REASON.to_string(), Value::String(reason.to_string()));
        }
        self.credentials.save(&credential).await?;
        tracing::info!(entity_id = %credential.id(), status = %status, "credential status set");
        Ok(())
    }
}

fn ensure_not_revoked(credential: &VerifiableCredentialResource) -> ServiceResult<()> {
    if credential.status() == Some(VcStatus::Revoked) {
        return Err(ServiceError::Conflict(format!(
            "credential '{}' is revoked",
            credential.id()
        )));
    }
    Ok(())
}

fn status_entry(credential: &VerifiableCredentialResource, purpose: &str) -> ServiceResult<StatusListEntry> {
    credential
        .verifiable_credential
        .credential
        .credential_status
        .iter()
        .filter(|entry| entry.status_type == BITSTRING_STATUS_LIST_ENTRY)
        .filter_map(|entry| StatusListEntry::parse(entry).ok())
        .find(|entry| entry.purpose.eq_ignore_ascii_case(purpose))
        .ok_or_else(|| {
            ServiceError::BadRequest(format!(
                "Credential did not contain a credentialStatus object with 'statusPurpose = {purpose}'"
            ))
        })
}

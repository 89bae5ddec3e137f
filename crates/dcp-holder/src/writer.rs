//! # Credential Writer
//!
//! Accepts credentials delivered by an issuer for an earlier request and
//! stores them.
//!
//! The holder request is leased for the duration of the write. Every
//! delivered credential is parsed and matched against the originally
//! requested type and format pairs before anything is stored, so a
//! rejected delivery leaves the credential store untouched. Storing is
//! all-or-nothing: an id clash anywhere in the delivery stores none of it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dcp_core::{ServiceError, ServiceResult, SharedClock, Stateful, StoreError, SystemClock};
use dcp_protocol::CredentialContainer;
use dcp_state::SharedStore;
use dcp_vc::{
    CredentialFormat, CredentialParser, VerifiableCredentialContainer,
    VerifiableCredentialResource, CREDENTIAL_OBJECT_ID,
};
use serde_json::Value;
use uuid::Uuid;

use crate::request::{HolderCredentialRequest, HolderRequestState};

const ALLOWED_STATES: [HolderRequestState; 2] =
    [HolderRequestState::Requested, HolderRequestState::Issued];

pub struct CredentialWriter {
    requests: SharedStore<HolderCredentialRequest>,
    credentials: SharedStore<VerifiableCredentialResource>,
    parser: Arc<dyn CredentialParser>,
    clock: SharedClock,
}

impl CredentialWriter {
    pub fn new(
        requests: SharedStore<HolderCredentialRequest>,
        credentials: SharedStore<VerifiableCredentialResource>,
        parser: Arc<dyn CredentialParser>,
    ) -> Self {
        Self {
            requests,
            credentials,
            parser,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Store `delivered` for the request `holder_pid` and mark it `ISSUED`.
    pub async fn write(
        &self,
        holder_pid: &str,
        issuer_pid: &str,
        delivered: &[CredentialContainer],
        participant_context_id: &str,
    ) -> ServiceResult<()> {
        let mut request = self.requests.find_by_id_and_lease(holder_pid).await?;

        let resources = match self.prepare(&request, delivered, participant_context_id) {
            Ok(resources) => resources,
            Err(e) => {
                self.release(holder_pid).await;
                return Err(e);
            }
        };

        if let Err(e) = self.store_all(&resources).await {
            self.release(holder_pid).await;
            return Err(e);
        }

        request
            .transition_issued(issuer_pid, self.clock.now())
            .map_err(ServiceError::from)?;
        self.requests.save(&request).await?;
        tracing::info!(
            entity_id = %holder_pid,
            issuer_pid = %issuer_pid,
            count = resources.len(),
            "stored delivered credentials"
        );
        Ok(())
    }

    fn prepare(
        &self,
        request: &HolderCredentialRequest,
        delivered: &[CredentialContainer],
        participant_context_id: &str,
    ) -> ServiceResult<Vec<VerifiableCredentialResource>> {
        let state = request.current_state();
        if !state.is_some_and(|s| ALLOWED_STATES.contains(&s)) {
            return Err(ServiceError::BadRequest(format!(
                "HolderCredentialRequest is expected to be in any of the states [{}, {}] but was '{}'",
                ALLOWED_STATES[0],
                ALLOWED_STATES[1],
                state.map_or_else(|| request.state().to_string(), |s| s.to_string()),
            )));
        }

        let now = self.clock.now();
        delivered
            .iter()
            .map(|container| -> ServiceResult<VerifiableCredentialResource> {
                let format: CredentialFormat = container.format.parse().map_err(|_| {
                    ServiceError::BadRequest(format!(
                        "Invalid format: '{}', expected one of {:?}",
                        container.format,
                        CredentialFormat::ALL.map(CredentialFormat::as_str)
                    ))
                })?;
                let credential = self
                    .parser
                    .parse(&container.payload, format)
                    .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

                let requested = request
                    .requested_credentials
                    .iter()
                    .find(|rc| {
                        credential.has_type(&rc.credential_type)
                            && rc.format.eq_ignore_ascii_case(format.as_str())
                    })
                    .ok_or_else(|| {
                        ServiceError::Unauthorized(format!(
                            "No credential request was made for Credentials of type '{:?}' serialized as '{}'",
                            credential.types, format
                        ))
                    })?;

                let id = credential
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let holder_id = credential
                    .credential_subject
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(participant_context_id)
                    .to_string();
                let raw_vc = match &container.payload {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                let container = VerifiableCredentialContainer {
                    raw_vc,
                    format,
                    credential,
                };
                let mut resource = VerifiableCredentialResource::new(
                    id,
                    participant_context_id,
                    holder_id,
                    container,
                    now,
                );
                resource.metadata = BTreeMap::from([(
                    CREDENTIAL_OBJECT_ID.to_string(),
                    Value::String(requested.id.clone()),
                )]);
                Ok(resource)
            })
            .collect()
    }

    /// Create every resource or none of them. Ids are checked up front;
    /// a create that still fails rolls back the ones already written.
    async fn store_all(&self, resources: &[VerifiableCredentialResource]) -> ServiceResult<()> {
        let mut seen = HashSet::new();
        for resource in resources {
            let id = resource.id();
            if !seen.insert(id) || self.credentials.find_by_id(id).await?.is_some() {
                return Err(StoreError::AlreadyExists { id: id.to_string() }.into());
            }
        }

        for (written, resource) in resources.iter().enumerate() {
            if let Err(e) = self.credentials.create(resource).await {
                for created in &resources[..written] {
                    if let Err(rollback) = self.credentials.delete_by_id(created.id()).await {
                        tracing::warn!(
                            entity_id = %created.id(),
                            error = %rollback,
                            "failed to roll back stored credential"
                        );
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn release(&self, holder_pid: &str) {
        if let Err(e) = self.requests.break_lease(holder_pid).await {
            tracing::warn!(entity_id = %holder_pid, error = %e, "failed to release request lease");
        }
    }
}

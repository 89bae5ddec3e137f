//! # Issuance Process Manager
//!
//! Drives `APPROVED` issuance processes to `DELIVERED`:
//!
//! 1. load the process's credential definitions;
//! 2. generate one credential per definition from the process claims,
//!    each with fresh status list positions when a [`StatusListManager`]
//!    is configured;
//! 3. deliver them to the holder's credential service;
//! 4. record them in the issuer's credential store;
//! 5. transition to `DELIVERED`.
//!
//! Any failure ends the process in `ERRORED` with the failure message as
//! `errorDetail`. Nothing is retried.

use std::sync::Arc;

use dcp_core::{SharedClock, StateCode, Stateful, SystemClock};
use dcp_state::{
    handler_fn, HandlerOutcome, ProcessError, ProcessorSettings, SharedStore, StateFilter,
    StateMachineProcessor,
};
use dcp_vc::{VerifiableCredentialContainer, VerifiableCredentialResource};
use serde_json::Value;
use uuid::Uuid;

use crate::definition::CredentialDefinitionStore;
use crate::delivery::CredentialStorageClient;
use crate::generator::CredentialGeneratorRegistry;
use crate::holder::HolderStore;
use crate::process::{IssuanceProcess, IssuanceProcessState};
use crate::status_list::StatusListManager;

/// Metadata key linking an issued credential to its issuance process.
pub const ISSUANCE_PROCESS_ID: &str = "issuanceProcessId";

pub struct IssuanceProcessManager {
    store: SharedStore<IssuanceProcess>,
    definitions: CredentialDefinitionStore,
    holders: HolderStore,
    generators: CredentialGeneratorRegistry,
    delivery: Arc<dyn CredentialStorageClient>,
    credentials: SharedStore<VerifiableCredentialResource>,
    issuer_did: String,
    status_lists: Option<Arc<StatusListManager>>,
    clock: SharedClock,
}

impl IssuanceProcessManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore<IssuanceProcess>,
        definitions: CredentialDefinitionStore,
        holders: HolderStore,
        generators: CredentialGeneratorRegistry,
        delivery: Arc<dyn CredentialStorageClient>,
        credentials: SharedStore<VerifiableCredentialResource>,
        issuer_did: impl Into<String>,
    ) -> Self {
        Self {
            store,
            definitions,
            holders,
            generators,
            delivery,
            credentials,
            issuer_did: issuer_did.into(),
            status_lists: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_status_lists(mut self, status_lists: Arc<StatusListManager>) -> Self {
        self.status_lists = Some(status_lists);
        self
    }

    pub fn processor(self: &Arc<Self>, settings: ProcessorSettings) -> StateMachineProcessor<IssuanceProcess> {
        let manager = Arc::clone(self);
        StateMachineProcessor::new(
            "issuer-process-approved",
            Arc::clone(&self.store),
            StateFilter::has_state(IssuanceProcessState::Approved.code()),
            Arc::new(handler_fn(move |process: IssuanceProcess| {
                let manager = Arc::clone(&manager);
                async move { manager.process_approved(process).await }
            })),
        )
        .with_settings(settings)
    }

    /// `APPROVED` → `DELIVERED` | `ERRORED`.
    pub async fn process_approved(
        &self,
        mut process: IssuanceProcess,
    ) -> Result<HandlerOutcome, ProcessError> {
        let credentials = match self.issue(&process).await {
            Ok(credentials) => credentials,
            Err(detail) => return self.fail(process, detail).await,
        };

        let now = self.clock.now();
        for container in credentials {
            let resource = to_resource(&process, container, now);
            if let Err(e) = self.credentials.create(&resource).await {
                return self.fail(process, e.to_string()).await;
            }
        }

        process.transition_delivered(self.clock.now())?;
        self.store.save(&process).await?;
        tracing::info!(entity_id = %process.id(), holder = %process.holder_id, "issuance process delivered");
        Ok(HandlerOutcome::Processed)
    }

    /// Generate and deliver the process's credentials.
    async fn issue(&self, process: &IssuanceProcess) -> Result<Vec<VerifiableCredentialContainer>, String> {
        let definitions = self.definitions.find_all(&process.credential_definitions);
        if definitions.len() != process.credential_definitions.len() {
            let missing: Vec<&str> = process
                .credential_definitions
                .iter()
                .filter(|id| !definitions.iter().any(|d| &d.id == *id))
                .map(String::as_str)
                .collect();
            return Err(format!("Credential definitions not found: {missing:?}"));
        }

        let holder = self
            .holders
            .find_by_id(&process.holder_id)
            .ok_or_else(|| format!("Holder '{}' not found", process.holder_id))?;

        let mut credentials = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            let format = process
                .credential_formats
                .get(&definition.id)
                .copied()
                .unwrap_or(definition.format);
            let credential_status = match &self.status_lists {
                Some(lists) => lists
                    .allocate(&process.participant_context_id)
                    .await
                    .map_err(|e| e.message().to_string())?,
                None => Vec::new(),
            };
            let container = self
                .generators
                .generate(
                    definition,
                    format,
                    &self.issuer_did,
                    &holder.did,
                    &process.claims,
                    &credential_status,
                )
                .await
                .map_err(|e| e.to_string())?;
            credentials.push(container);
        }

        self.delivery
            .deliver(process, &holder.did, &credentials)
            .await
            .map_err(|e| e.message().to_string())?;
        Ok(credentials)
    }

    async fn fail(
        &self,
        mut process: IssuanceProcess,
        detail: impl Into<String>,
    ) -> Result<HandlerOutcome, ProcessError> {
        let detail = detail.into();
        tracing::warn!(entity_id = %process.id(), state = process.state(), error = %detail, "issuance process failed");
        process.transition_errored(detail, self.clock.now())?;
        self.store.save(&process).await?;
        Ok(HandlerOutcome::Processed)
    }
}

fn to_resource(
    process: &IssuanceProcess,
    container: VerifiableCredentialContainer,
    now: chrono::DateTime<chrono::Utc>,
) -> VerifiableCredentialResource {
    let id = container
        .credential
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let holder_id = container
        .credential
        .credential_subject
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(process.holder_id.as_str())
        .to_string();
    VerifiableCredentialResource::new(id, &process.participant_context_id, holder_id, container, now)
        .with_metadata(ISSUANCE_PROCESS_ID, Value::String(process.entity.id.clone()))
}

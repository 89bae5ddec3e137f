//! # Issuer Service
//!
//! The synchronous DCP entry points on the issuer side.
//!
//! [`IssuerService::initiate_credentials_issuance`] authorizes a
//! credential request and, if it passes, records an [`IssuanceProcess`] in
//! `APPROVED`. The checks run in this order and stop at the first failure:
//!
//! 1. at least one credential is requested;
//! 2. every requested type has a credential definition;
//! 3. every requested format is the definition's format;
//! 4. the matched definitions reference at least one attestation;
//! 5. the attestation pipeline produces claims;
//! 6. every rule of every matched definition passes.
//!
//! Failures of 5 and 6 are reported as a bare `Unauthorized` so that a
//! caller learns nothing about the policy it failed.
//!
//! [`IssuerService::credential_status`] answers holder status polls.

use std::sync::Arc;

use dcp_core::{ServiceError, ServiceResult, SharedClock, SystemClock};
use dcp_protocol::{CredentialRequestMessage, CredentialStatusMessage};
use dcp_state::SharedStore;
use dcp_vc::CredentialFormat;
use uuid::Uuid;

use crate::attestation::{AttestationContext, AttestationPipeline};
use crate::definition::{CredentialDefinition, CredentialDefinitionStore};
use crate::holder::{HolderStore, RequestContext};
use crate::process::{IssuanceProcess, IssuanceProcessState};
use crate::rule::RuleRegistry;

pub struct IssuerService {
    processes: SharedStore<IssuanceProcess>,
    definitions: CredentialDefinitionStore,
    holders: HolderStore,
    pipeline: AttestationPipeline,
    rules: RuleRegistry,
    clock: SharedClock,
}

impl IssuerService {
    pub fn new(
        processes: SharedStore<IssuanceProcess>,
        definitions: CredentialDefinitionStore,
        holders: HolderStore,
        pipeline: AttestationPipeline,
        rules: RuleRegistry,
    ) -> Self {
        Self {
            processes,
            definitions,
            holders,
            pipeline,
            rules,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn processes(&self) -> &SharedStore<IssuanceProcess> {
        &self.processes
    }

    /// Authorize `message` for the authenticated holder and create an
    /// `APPROVED` issuance process. Returns the process id, which the
    /// holder knows as `issuerPid`.
    pub async fn initiate_credentials_issuance(
        &self,
        participant_context_id: &str,
        message: &CredentialRequestMessage,
        context: &RequestContext,
    ) -> ServiceResult<String> {
        if message.credentials.is_empty() {
            return Err(ServiceError::BadRequest("No credentials requested".into()));
        }
        if message.holder_pid.trim().is_empty() {
            return Err(ServiceError::BadRequest("holderPid must not be empty".into()));
        }

        let mut matched: Vec<(CredentialDefinition, CredentialFormat)> = Vec::new();
        for requested in &message.credentials {
            let Some(definition) = self.definitions.find_by_type(&requested.credential_type) else {
                return Err(ServiceError::BadRequest(
                    "Not all requested credential types have a corresponding credential definition"
                        .into(),
                ));
            };
            let format = requested
                .format
                .parse::<CredentialFormat>()
                .ok()
                .filter(|f| *f == definition.format)
                .ok_or_else(|| {
                    ServiceError::BadRequest(format!(
                        "Credential format {} not supported for credential type {}",
                        requested.format, requested.credential_type
                    ))
                })?;
            if !matched.iter().any(|(d, _)| d.id == definition.id) {
                matched.push((definition, format));
            }
        }

        let mut attestations: Vec<String> = Vec::new();
        for id in matched.iter().flat_map(|(d, _)| &d.attestations) {
            if !attestations.contains(id) {
                attestations.push(id.clone());
            }
        }
        if attestations.is_empty() {
            return Err(ServiceError::BadRequest(
                "No attestations found for requested credentials".into(),
            ));
        }

        let attestation_context = AttestationContext {
            participant_context_id,
            request: context,
        };
        let claims = self
            .pipeline
            .evaluate(&attestations, &attestation_context)
            .await
            .map_err(|e| {
                tracing::info!(holder = %context.holder.holder_id, error = %e, "attestation evaluation failed");
                ServiceError::Unauthorized("unauthorized".into())
            })?;
        self.rules
            .evaluate_all(matched.iter().flat_map(|(d, _)| &d.rules), &claims)
            .map_err(|e| {
                tracing::info!(holder = %context.holder.holder_id, error = %e, "credential rule failed");
                ServiceError::Unauthorized("unauthorized".into())
            })?;

        let process = matched
            .into_iter()
            .fold(
                IssuanceProcess::approved(
                    Uuid::new_v4().to_string(),
                    participant_context_id,
                    &context.holder.holder_id,
                    &message.holder_pid,
                    self.clock.now(),
                ),
                |process, (definition, format)| process.with_definition(definition.id, format),
            )
            .with_claims(claims);
        self.processes.create(&process).await?;
        tracing::info!(
            entity_id = %process.entity.id,
            holder = %process.holder_id,
            definitions = ?process.credential_definitions,
            "issuance process approved"
        );
        Ok(process.entity.id)
    }

    /// The status of issuance process `issuer_pid` as seen by the holder
    /// identified by `holder_did`. Processes of other participants or
    /// holders are reported as not found.
    pub async fn credential_status(
        &self,
        participant_context_id: &str,
        holder_did: &str,
        issuer_pid: &str,
    ) -> ServiceResult<CredentialStatusMessage> {
        let not_found =
            || ServiceError::NotFound(format!("No credential request with id '{issuer_pid}' found"));

        let holder = self.holders.find_by_did(holder_did).ok_or_else(not_found)?;
        let process = self
            .processes
            .find_by_id(issuer_pid)
            .await?
            .filter(|p| {
                p.participant_context_id == participant_context_id && p.holder_id == holder.holder_id
            })
            .ok_or_else(not_found)?;
        let state = process.current_state().ok_or_else(|| {
            ServiceError::Persistence(format!(
                "issuance process '{issuer_pid}' has unknown state code {}",
                process.entity.state
            ))
        })?;

        Ok(CredentialStatusMessage::new(
            process.holder_pid,
            process.entity.id,
            state.request_status(),
        ))
    }

    /// Force an `APPROVED` process into `ERRORED`, for operators.
    pub async fn revoke_approval(&self, issuer_pid: &str, reason: &str) -> ServiceResult<()> {
        let mut process = self.processes.find_by_id_and_lease(issuer_pid).await?;
        let state = process.current_state();
        if state != Some(IssuanceProcessState::Approved) {
            self.processes.break_lease(issuer_pid).await?;
            return Err(ServiceError::Conflict(format!(
                "issuance process '{issuer_pid}' is not {} but {}",
                IssuanceProcessState::Approved,
                state.map_or_else(|| process.entity.state.to_string(), |s| s.to_string())
            )));
        }
        process.transition_errored(reason, self.clock.now())?;
        self.processes.save(&process).await?;
        Ok(())
    }
}

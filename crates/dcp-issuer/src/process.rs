//! # Issuance Process
//!
//! The issuer-side record of one authorized credential request.
//!
//! ```text
//! SUBMITTED ──► APPROVED ──► DELIVERED
//!     │            │
//!     └────────────┴──────► ERRORED
//! ```
//!
//! Processes created by the DCP entry point start in `APPROVED`: by then
//! the attestations and rules have already passed. `DELIVERED` and
//! `ERRORED` are terminal.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use dcp_core::{advance, StateCode, StateTransitionError, Stateful, StatefulEntity};
use dcp_protocol::CredentialRequestStatus;
use dcp_vc::CredentialFormat;
use serde::{Deserialize, Serialize};

use crate::attestation::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuanceProcessState {
    Submitted,
    Approved,
    Delivered,
    Errored,
}

impl StateCode for IssuanceProcessState {
    fn code(self) -> i32 {
        match self {
            Self::Submitted => 50,
            Self::Approved => 100,
            Self::Delivered => 200,
            Self::Errored => 300,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            50 => Some(Self::Submitted),
            100 => Some(Self::Approved),
            200 => Some(Self::Delivered),
            300 => Some(Self::Errored),
            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Errored)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use IssuanceProcessState::*;
        matches!(
            (self, next),
            (Submitted, Approved) | (Approved, Delivered) | (Submitted | Approved, Errored)
        )
    }
}

impl IssuanceProcessState {
    /// How the state is reported to a polling holder.
    pub fn request_status(self) -> CredentialRequestStatus {
        match self {
            Self::Submitted | Self::Approved => CredentialRequestStatus::Received,
            Self::Delivered => CredentialRequestStatus::Issued,
            Self::Errored => CredentialRequestStatus::Rejected,
        }
    }
}

impl fmt::Display for IssuanceProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
            Self::Delivered => "DELIVERED",
            Self::Errored => "ERRORED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceProcess {
    #[serde(flatten)]
    pub entity: StatefulEntity,
    /// The issuer participant this process belongs to.
    pub participant_context_id: String,
    pub holder_id: String,
    /// The holder's id for the request, echoed back on delivery.
    pub holder_pid: String,
    /// Ids of the credential definitions to issue.
    pub credential_definitions: Vec<String>,
    /// Claims gathered by the attestation pipeline.
    #[serde(default)]
    pub claims: Claims,
    /// Requested format per credential definition id.
    #[serde(default)]
    pub credential_formats: BTreeMap<String, CredentialFormat>,
}

impl IssuanceProcess {
    /// A process that passed authorization, created in `APPROVED`.
    pub fn approved(
        id: impl Into<String>,
        participant_context_id: impl Into<String>,
        holder_id: impl Into<String>,
        holder_pid: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: StatefulEntity::new(id, IssuanceProcessState::Approved.code(), now),
            participant_context_id: participant_context_id.into(),
            holder_id: holder_id.into(),
            holder_pid: holder_pid.into(),
            credential_definitions: Vec::new(),
            claims: Claims::new(),
            credential_formats: BTreeMap::new(),
        }
    }

    pub fn with_definition(mut self, definition_id: impl Into<String>, format: CredentialFormat) -> Self {
        let definition_id = definition_id.into();
        self.credential_formats.insert(definition_id.clone(), format);
        self.credential_definitions.push(definition_id);
        self
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    pub fn current_state(&self) -> Option<IssuanceProcessState> {
        IssuanceProcessState::from_code(self.entity.state)
    }

    pub fn transition_approved(&mut self, now: DateTime<Utc>) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, IssuanceProcessState::Approved, now)
    }

    pub fn transition_delivered(&mut self, now: DateTime<Utc>) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, IssuanceProcessState::Delivered, now)
    }

    pub fn transition_errored(
        &mut self,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, IssuanceProcessState::Errored, now)?;
        self.entity.error_detail = Some(detail.into());
        Ok(())
    }
}

impl Stateful for IssuanceProcess {
    const KIND: &'static str = "issuance_process";

    fn entity(&self) -> &StatefulEntity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut StatefulEntity {
        &mut self.entity
    }
}

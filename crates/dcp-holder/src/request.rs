//! # Holder Credential Request
//!
//! The holder-side record of one credential request to one issuer.
//!
//! ```text
//! CREATED ──► REQUESTING ──► REQUESTED ──► ISSUED
//!    │            │  ▲           │  ▲
//!    │            └──┘           └──┘   (re-entry)
//!    └────────────┴──────────────┴────► ERROR
//! ```
//!
//! `ISSUED` and `ERROR` are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use dcp_core::{advance, StateCode, StateTransitionError, Stateful, StatefulEntity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderRequestState {
    Created,
    Requesting,
    Requested,
    Issued,
    Error,
}

impl StateCode for HolderRequestState {
    fn code(self) -> i32 {
        match self {
            Self::Created => 100,
            Self::Requesting => 200,
            Self::Requested => 300,
            Self::Issued => 400,
            Self::Error => -1,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            100 => Some(Self::Created),
            200 => Some(Self::Requesting),
            300 => Some(Self::Requested),
            400 => Some(Self::Issued),
            -1 => Some(Self::Error),
            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Issued | Self::Error)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use HolderRequestState::*;
        matches!(
            (self, next),
            (Created, Requesting)
                | (Requesting, Requesting)
                | (Requesting, Requested)
                | (Requested, Requested)
                | (Requested, Issued)
                | (Created | Requesting | Requested, Error)
        )
    }
}

impl fmt::Display for HolderRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Requesting => "REQUESTING",
            Self::Requested => "REQUESTED",
            Self::Issued => "ISSUED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One credential asked for: the credential object id it was offered
/// under, its type and its format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedCredential {
    pub id: String,
    pub credential_type: String,
    pub format: String,
}

impl RequestedCredential {
    pub fn new(
        id: impl Into<String>,
        credential_type: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            credential_type: credential_type.into(),
            format: format.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderCredentialRequest {
    #[serde(flatten)]
    pub entity: StatefulEntity,
    pub issuer_did: String,
    pub participant_context_id: String,
    /// Process id assigned by the issuer once it acknowledged the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_pid: Option<String>,
    pub requested_credentials: Vec<RequestedCredential>,
    /// First entry into `REQUESTED`. Status polls re-enter that state, so
    /// the request timeout is measured from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

impl HolderCredentialRequest {
    pub fn new(
        request_id: impl Into<String>,
        participant_context_id: impl Into<String>,
        issuer_did: impl Into<String>,
        requested_credentials: Vec<RequestedCredential>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: StatefulEntity::new(request_id, HolderRequestState::Created.code(), now),
            issuer_did: issuer_did.into(),
            participant_context_id: participant_context_id.into(),
            issuer_pid: None,
            requested_credentials,
            requested_at: None,
        }
    }

    /// The holder's id for this request, sent as `holderPid`.
    pub fn holder_pid(&self) -> &str {
        &self.entity.id
    }

    pub fn current_state(&self) -> Option<HolderRequestState> {
        HolderRequestState::from_code(self.entity.state)
    }

    pub fn transition_requesting(&mut self, now: DateTime<Utc>) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, HolderRequestState::Requesting, now)
    }

    pub fn transition_requested(
        &mut self,
        issuer_pid: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, HolderRequestState::Requested, now)?;
        self.issuer_pid = Some(issuer_pid.into());
        self.requested_at.get_or_insert(now);
        Ok(())
    }

    /// Re-enter `REQUESTED` after an inconclusive status poll.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, HolderRequestState::Requested, now)
    }

    /// Mark the request issued. A request that is already `ISSUED` may
    /// receive further deliveries and re-enters the state.
    pub fn transition_issued(
        &mut self,
        issuer_pid: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        if self.current_state() == Some(HolderRequestState::Issued) {
            self.entity.transition_to(HolderRequestState::Issued.code(), now);
        } else {
            advance(&mut self.entity, HolderRequestState::Issued, now)?;
        }
        self.issuer_pid = Some(issuer_pid.into());
        Ok(())
    }

    pub fn transition_error(
        &mut self,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, HolderRequestState::Error, now)?;
        self.entity.error_detail = Some(detail.into());
        Ok(())
    }
}

impl Stateful for HolderCredentialRequest {
    const KIND: &'static str = "holder_credential_request";

    fn entity(&self) -> &StatefulEntity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut StatefulEntity {
        &mut self.entity
    }
}

//! # Stored Credentials
//!
//! [`VerifiableCredentialResource`] is the credential-store record. Its
//! entity `state` holds the code of the last derived [`VcStatus`]; the
//! lifecycle of the issuance act itself is tracked separately in
//! [`VcIssuanceState`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use dcp_core::{Criterion, Operator, QuerySpec, Stateful, StatefulEntity, StoreError};
use dcp_state::SharedStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credential::VerifiableCredentialContainer;

/// Derived lifecycle status of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VcStatus {
    Issued,
    Suspended,
    Expired,
    NotYetValid,
    Revoked,
    /// Status could not be determined.
    Other,
}

impl VcStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Issued => 300,
            Self::Suspended => 500,
            Self::Expired => 600,
            Self::NotYetValid => 700,
            Self::Revoked => 800,
            Self::Other => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            300 => Some(Self::Issued),
            500 => Some(Self::Suspended),
            600 => Some(Self::Expired),
            700 => Some(Self::NotYetValid),
            800 => Some(Self::Revoked),
            -1 => Some(Self::Other),
            _ => None,
        }
    }

    /// Whether a credential in this status is usable in a presentation.
    pub fn is_valid(self) -> bool {
        self == Self::Issued
    }
}

impl fmt::Display for VcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Issued => "ISSUED",
            Self::Suspended => "SUSPENDED",
            Self::Expired => "EXPIRED",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::Revoked => "REVOKED",
            Self::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the issuance act that produced a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VcIssuanceState {
    /// Issued and delivered.
    Issued,
    /// A re-issuance request has been sent for this credential.
    ReissueRequested,
}

/// A credential held in a credential store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredentialResource {
    #[serde(flatten)]
    pub entity: StatefulEntity,
    pub issuer_id: String,
    pub holder_id: String,
    pub participant_context_id: String,
    pub verifiable_credential: VerifiableCredentialContainer,
    pub issuance_state: VcIssuanceState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl VerifiableCredentialResource {
    /// A freshly issued credential, stored in status `ISSUED`.
    pub fn new(
        id: impl Into<String>,
        participant_context_id: impl Into<String>,
        holder_id: impl Into<String>,
        verifiable_credential: VerifiableCredentialContainer,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: StatefulEntity::new(id, VcStatus::Issued.code(), now),
            issuer_id: verifiable_credential.credential.issuer.clone(),
            holder_id: holder_id.into(),
            participant_context_id: participant_context_id.into(),
            verifiable_credential,
            issuance_state: VcIssuanceState::Issued,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The stored status, or `None` for an unknown code.
    pub fn status(&self) -> Option<VcStatus> {
        VcStatus::from_code(self.entity.state)
    }

    /// Record a newly derived status. Status changes follow the evaluator,
    /// not a forward-only graph, so no transition check applies.
    pub fn set_status(&mut self, status: VcStatus, now: DateTime<Utc>) {
        self.entity.transition_to(status.code(), now);
        if status != VcStatus::Other {
            self.entity.error_detail = None;
        }
    }
}

impl Stateful for VerifiableCredentialResource {
    const KIND: &'static str = "verifiable_credential";

    fn entity(&self) -> &StatefulEntity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut StatefulEntity {
        &mut self.entity
    }
}

// ---- Query helpers ----

pub async fn credentials_by_participant(
    store: &SharedStore<VerifiableCredentialResource>,
    participant_context_id: &str,
) -> Result<Vec<VerifiableCredentialResource>, StoreError> {
    store
        .query(&QuerySpec::new().with_filter(Criterion::eq(
            "participantContextId",
            participant_context_id,
        )))
        .await
}

pub async fn credentials_by_holder(
    store: &SharedStore<VerifiableCredentialResource>,
    holder_id: &str,
) -> Result<Vec<VerifiableCredentialResource>, StoreError> {
    store
        .query(&QuerySpec::new().with_filter(Criterion::eq("holderId", holder_id)))
        .await
}

/// Credentials of a participant carrying `credential_type` among their types.
pub async fn credentials_by_type(
    store: &SharedStore<VerifiableCredentialResource>,
    participant_context_id: &str,
    credential_type: &str,
) -> Result<Vec<VerifiableCredentialResource>, StoreError> {
    store
        .query(
            &QuerySpec::new()
                .with_filter(Criterion::eq("participantContextId", participant_context_id))
                .with_filter(Criterion::new(
                    "verifiableCredential.credential.type",
                    Operator::Contains,
                    credential_type,
                )),
        )
        .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credential::{CredentialFormat, VerifiableCredential};
    use dcp_state::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    pub(crate) fn credential(
        types: &[&str],
        issuance: DateTime<Utc>,
        expiration: Option<DateTime<Utc>>,
    ) -> VerifiableCredential {
        VerifiableCredential {
            id: Some("urn:uuid:1".into()),
            types: types.iter().map(|t| t.to_string()).collect(),
            issuer: "did:web:issuer".into(),
            issuance_date: issuance,
            expiration_date: expiration,
            credential_subject: json!({"id": "did:web:holder"}),
            credential_status: Vec::new(),
        }
    }

    pub(crate) fn resource(
        id: &str,
        participant: &str,
        credential: VerifiableCredential,
    ) -> VerifiableCredentialResource {
        let container = VerifiableCredentialContainer {
            raw_vc: serde_json::to_string(&credential).unwrap(),
            format: CredentialFormat::Vc1Jwt,
            credential,
        };
        VerifiableCredentialResource::new(id, participant, "did:web:holder", container, Utc::now())
    }

    #[test]
    fn status_codes_round_trip() {
        for s in [
            VcStatus::Issued,
            VcStatus::Suspended,
            VcStatus::Expired,
            VcStatus::NotYetValid,
            VcStatus::Revoked,
            VcStatus::Other,
        ] {
            assert_eq!(VcStatus::from_code(s.code()), Some(s));
        }
        assert_eq!(VcStatus::from_code(42), None);
        assert_eq!(VcStatus::NotYetValid.to_string(), "NOT_YET_VALID");
    }

    #[test]
    fn set_status_tracks_reentry_and_clears_error() {
        let now = Utc::now();
        let mut r = resource("c1", "p1", credential(&["VerifiableCredential"], now, None));
        assert_eq!(r.status(), Some(VcStatus::Issued));
        assert_eq!(r.issuer_id, "did:web:issuer");

        r.entity.error_detail = Some("registry down".into());
        r.set_status(VcStatus::Other, now);
        assert_eq!(r.entity.error_detail.as_deref(), Some("registry down"));
        r.set_status(VcStatus::Suspended, now);
        assert!(r.entity.error_detail.is_none());
        r.set_status(VcStatus::Suspended, now);
        assert_eq!(r.entity.state_count, 2);
    }

    #[tokio::test]
    async fn query_helpers() {
        let now = Utc::now();
        let store: SharedStore<VerifiableCredentialResource> =
            Arc::new(InMemoryStore::new("node-a"));
        store
            .save(&resource("c1", "p1", credential(&["VerifiableCredential", "MembershipCredential"], now, None)))
            .await
            .unwrap();
        store
            .save(&resource("c2", "p1", credential(&["VerifiableCredential", "DemoCredential"], now, None)))
            .await
            .unwrap();
        store
            .save(&resource("c3", "p2", credential(&["VerifiableCredential", "MembershipCredential"], now, None)))
            .await
            .unwrap();

        assert_eq!(credentials_by_participant(&store, "p1").await.unwrap().len(), 2);
        assert_eq!(credentials_by_holder(&store, "did:web:holder").await.unwrap().len(), 3);
        let members = credentials_by_type(&store, "p1", "MembershipCredential").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].entity.id, "c1");
    }
}

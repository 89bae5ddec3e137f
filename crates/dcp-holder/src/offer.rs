//! # Credential Offers
//!
//! Issuers may push unsolicited offers. An offer is stored in `RECEIVED`;
//! the offer processor turns it into a credential request:
//!
//! ```text
//! RECEIVED ──► PROCESSING ──► PROCESSED
//!                   └────────► REJECTED
//! ```
//!
//! The format of each offered credential is derived from its DCP profile
//! through a [`ProfileRegistry`]. An offer without a single derivable
//! format is rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dcp_core::{
    advance, ServiceError, ServiceResult, SharedClock, StateCode, StateTransitionError, Stateful,
    StatefulEntity, SystemClock,
};
use dcp_protocol::{CredentialObject, CredentialOfferMessage};
use dcp_state::{
    handler_fn, HandlerOutcome, ProcessError, ProcessorSettings, SharedStore, StateFilter,
    StateMachineProcessor,
};
use dcp_vc::CredentialFormat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manager::CredentialRequestManager;
use crate::request::RequestedCredential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialOfferState {
    Received,
    Processing,
    Processed,
    Rejected,
}

impl StateCode for CredentialOfferState {
    fn code(self) -> i32 {
        match self {
            Self::Received => 100,
            Self::Processing => 200,
            Self::Processed => 300,
            Self::Rejected => 400,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            100 => Some(Self::Received),
            200 => Some(Self::Processing),
            300 => Some(Self::Processed),
            400 => Some(Self::Rejected),
            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Rejected)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use CredentialOfferState::*;
        matches!(
            (self, next),
            (Received, Processing) | (Processing, Processed) | (Received | Processing, Rejected)
        )
    }
}

impl fmt::Display for CredentialOfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOffer {
    #[serde(flatten)]
    pub entity: StatefulEntity,
    pub participant_context_id: String,
    /// DID of the offering issuer.
    pub issuer: String,
    pub credential_objects: Vec<CredentialObject>,
}

impl CredentialOffer {
    pub fn new(
        id: impl Into<String>,
        participant_context_id: impl Into<String>,
        issuer: impl Into<String>,
        credential_objects: Vec<CredentialObject>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: StatefulEntity::new(id, CredentialOfferState::Received.code(), now),
            participant_context_id: participant_context_id.into(),
            issuer: issuer.into(),
            credential_objects,
        }
    }

    pub fn current_state(&self) -> Option<CredentialOfferState> {
        CredentialOfferState::from_code(self.entity.state)
    }

    pub fn transition(
        &mut self,
        to: CredentialOfferState,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        advance(&mut self.entity, to, now)
    }
}

impl Stateful for CredentialOffer {
    const KIND: &'static str = "credential_offer";

    fn entity(&self) -> &StatefulEntity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut StatefulEntity {
        &mut self.entity
    }
}

// ---- Profiles ----

/// Maps DCP profile names to the credential format they imply.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<String, CredentialFormat>,
}

impl Default for ProfileRegistry {
    /// The profiles defined by DCP.
    fn default() -> Self {
        Self::empty()
            .with_profile("vc11-sl2021/jwt", CredentialFormat::Vc1Jwt)
            .with_profile("vc11-sl2021/jsonld", CredentialFormat::Vc1Ld)
            .with_profile("vc20-bssl/jwt", CredentialFormat::Vc2Jose)
    }
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>, format: CredentialFormat) -> Self {
        self.profiles.insert(profile.into(), format);
        self
    }

    pub fn format_of(&self, profile: &str) -> Option<CredentialFormat> {
        self.profiles.get(profile).copied()
    }
}

// ---- Service ----

/// Receives offers and turns them into credential requests.
pub struct CredentialOfferService {
    store: SharedStore<CredentialOffer>,
    requests: Arc<CredentialRequestManager>,
    profiles: ProfileRegistry,
    clock: SharedClock,
}

impl CredentialOfferService {
    pub fn new(
        store: SharedStore<CredentialOffer>,
        requests: Arc<CredentialRequestManager>,
        profiles: ProfileRegistry,
    ) -> Self {
        Self {
            store,
            requests,
            profiles,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &SharedStore<CredentialOffer> {
        &self.store
    }

    /// Store an inbound offer in `RECEIVED`. Returns the offer id.
    pub async fn receive(
        &self,
        participant_context_id: &str,
        message: CredentialOfferMessage,
    ) -> ServiceResult<String> {
        if message.credentials.is_empty() {
            return Err(ServiceError::BadRequest(
                "Credential offer contains no credentials".into(),
            ));
        }
        let offer = CredentialOffer::new(
            Uuid::new_v4().to_string(),
            participant_context_id,
            message.issuer,
            message.credentials,
            self.clock.now(),
        );
        self.store.create(&offer).await?;
        tracing::info!(entity_id = %offer.id(), issuer = %offer.issuer, "credential offer received");
        Ok(offer.id().to_string())
    }

    pub fn processor(
        self: &Arc<Self>,
        settings: ProcessorSettings,
    ) -> StateMachineProcessor<CredentialOffer> {
        let service = Arc::clone(self);
        StateMachineProcessor::new(
            "holder-credential-offer",
            Arc::clone(&self.store),
            StateFilter::has_state(CredentialOfferState::Received.code()),
            Arc::new(handler_fn(move |offer: CredentialOffer| {
                let service = Arc::clone(&service);
                async move { service.process_received(offer).await }
            })),
        )
        .with_settings(settings)
    }

    /// `RECEIVED` → `PROCESSING` → `PROCESSED` | `REJECTED`.
    pub async fn process_received(
        &self,
        mut offer: CredentialOffer,
    ) -> Result<HandlerOutcome, ProcessError> {
        offer.transition(CredentialOfferState::Processing, self.clock.now())?;
        self.store.update(&offer).await?;

        let requested = self.requested_credentials(&offer);
        if requested.is_empty() {
            let detail = "No credential format could be derived from any of the offered profiles";
            tracing::warn!(entity_id = %offer.id(), error = detail, "rejecting credential offer");
            offer.entity.error_detail = Some(detail.into());
            offer.transition(CredentialOfferState::Rejected, self.clock.now())?;
            self.store.save(&offer).await?;
            return Ok(HandlerOutcome::Processed);
        }

        let holder_pid = Uuid::new_v4().to_string();
        if let Err(e) = self
            .requests
            .initiate_request(&offer.participant_context_id, &offer.issuer, &holder_pid, requested)
            .await
        {
            tracing::warn!(
                entity_id = %offer.id(),
                error = %e,
                "could not initiate credential request for offer, manual reconciliation required"
            );
            offer.entity.error_detail = Some(e.to_string());
        }

        offer.transition(CredentialOfferState::Processed, self.clock.now())?;
        self.store.save(&offer).await?;
        Ok(HandlerOutcome::Processed)
    }

    fn requested_credentials(&self, offer: &CredentialOffer) -> Vec<RequestedCredential> {
        offer
            .credential_objects
            .iter()
            .filter_map(|object| match self.profiles.format_of(&object.profile) {
                Some(format) => Some(RequestedCredential::new(
                    object.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                    &object.credential_type,
                    format.as_str(),
                )),
                None => {
                    tracing::warn!(
                        entity_id = %offer.id(),
                        credential_type = %object.credential_type,
                        profile = %object.profile,
                        "no credential format derivable from offered profile"
                    );
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HolderCredentialRequest, HolderRequestState};
    use dcp_core::QuerySpec;
    use dcp_protocol::testing::{FakeTokenService, RecordingHttpClient, StaticDidResolver};
    use dcp_state::{InMemoryStore, LeasableStore};

    struct Fixture {
        offers: InMemoryStore<CredentialOffer>,
        requests: InMemoryStore<HolderCredentialRequest>,
        service: Arc<CredentialOfferService>,
    }

    fn fixture() -> Fixture {
        let offers = InMemoryStore::new("node-a");
        let requests = InMemoryStore::new("node-a");
        let manager = Arc::new(CredentialRequestManager::new(
            Arc::new(requests.clone()),
            Arc::new(StaticDidResolver::new()),
            Arc::new(RecordingHttpClient::always_ok("")),
            Arc::new(FakeTokenService::new()),
            "did:web:holder",
        ));
        let service = Arc::new(CredentialOfferService::new(
            Arc::new(offers.clone()),
            manager,
            ProfileRegistry::default(),
        ));
        Fixture {
            offers,
            requests,
            service,
        }
    }

    fn object(id: &str, credential_type: &str, profile: &str) -> CredentialObject {
        CredentialObject {
            id: Some(id.into()),
            credential_type: credential_type.into(),
            profile: profile.into(),
            offer_reason: None,
            binding_methods: vec![],
            issuance_policy: None,
        }
    }

    fn offer_message(credentials: Vec<CredentialObject>) -> CredentialOfferMessage {
        CredentialOfferMessage {
            issuer: "did:web:issuer".into(),
            credentials,
        }
    }

    #[tokio::test]
    async fn offer_becomes_credential_request() {
        let f = fixture();
        let offer_id = f
            .service
            .receive(
                "participant-1",
                offer_message(vec![
                    object("obj-1", "MembershipCredential", "vc11-sl2021/jwt"),
                    object("obj-2", "DemoCredential", "unknown/profile"),
                ]),
            )
            .await
            .unwrap();

        let processor = f.service.processor(ProcessorSettings::default());
        assert_eq!(processor.process_batch().await.unwrap().progressed, 1);

        let offer = f.offers.find_by_id(&offer_id).await.unwrap().unwrap();
        assert_eq!(offer.current_state(), Some(CredentialOfferState::Processed));
        assert!(offer.entity.error_detail.is_none());

        let requests = f.requests.query(&QuerySpec::new()).await.unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.current_state(), Some(HolderRequestState::Created));
        assert_eq!(request.issuer_did, "did:web:issuer");
        assert_eq!(request.participant_context_id, "participant-1");
        assert_eq!(
            request.requested_credentials,
            vec![RequestedCredential::new("obj-1", "MembershipCredential", "VC1_0_JWT")]
        );
    }

    #[tokio::test]
    async fn offer_without_known_profile_is_rejected() {
        let f = fixture();
        let offer_id = f
            .service
            .receive(
                "participant-1",
                offer_message(vec![object("obj-1", "MembershipCredential", "vc99/cbor")]),
            )
            .await
            .unwrap();

        f.service
            .processor(ProcessorSettings::default())
            .process_batch()
            .await
            .unwrap();

        let offer = f.offers.find_by_id(&offer_id).await.unwrap().unwrap();
        assert_eq!(offer.current_state(), Some(CredentialOfferState::Rejected));
        assert!(offer.entity.error_detail.is_some());
        assert!(f.requests.is_empty());
    }

    #[tokio::test]
    async fn empty_offer_is_bad_request() {
        let f = fixture();
        let err = f
            .service
            .receive("participant-1", offer_message(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn offer_graph_is_forward_only() {
        let now = Utc::now();
        let mut offer = CredentialOffer::new("o", "p", "did:web:issuer", vec![], now);
        assert!(offer.transition(CredentialOfferState::Processed, now).is_err());
        offer.transition(CredentialOfferState::Processing, now).unwrap();
        offer.transition(CredentialOfferState::Processed, now).unwrap();
        assert!(offer.transition(CredentialOfferState::Rejected, now).is_err());
    }
}

//! # Node Wiring
//!
//! Builds every store, service and state machine a node runs from a
//! [`NodeConfig`], a [`StoreBackend`] and the protocol [`Collaborators`].
//!
//! | Role | State machine | Processors |
//! |---|---|---|
//! | holder | `holder` | `holder-request-initial`, `holder-request-requested`, `holder-credential-offer` |
//! | issuer | `issuer` | `issuer-process-approved` |
//! | watchdog | `watchdog` | `credential-watchdog` |
//!
//! Holder and issuer share one credential store, partitioned by
//! participant context. The watchdog reads bitstring status lists over
//! HTTP and, with the holder role enabled, re-requests credentials close to
//! expiry through the holder's request manager.

use std::sync::Arc;
use std::time::Duration;

use dcp_core::{SharedClock, Stateful, StoreError, SystemClock};
use dcp_holder::{
    CredentialOffer, CredentialOfferService, CredentialRequestManager, CredentialWriter,
    HolderCredentialRequest, ProfileRegistry,
};
use dcp_issuer::{
    AttestationDefinitionStore, AttestationPipeline, AttestationSourceRegistry,
    CredentialDefinitionStore, DatabaseAttestationFactory, DcpCredentialStorageClient,
    CredentialStatusService, HolderAuthenticator, HolderStore, IssuanceProcess,
    IssuanceProcessManager, IssuerService, PresentationAttestationFactory, RuleRegistry,
    StatusListCredential, StatusListManager, UnsignedJsonGenerator, DATABASE_ATTESTATION_TYPE,
    PRESENTATION_ATTESTATION_TYPE,
};
use dcp_protocol::{
    DidResolver, DidResolverRegistry, HttpClient, ProtocolError, RemoteSecureTokenService,
    ReqwestHttpClient, SecureTokenService, TokenVerifier, WebDidResolver,
};
use dcp_state::{
    FixedWaitStrategy, InMemoryStore, PostgresStore, Processor, SharedStore, StateMachine,
    StateMachineHandle,
};
use dcp_vc::{
    CredentialReissuer, CredentialWatchdog, JsonCredentialParser, RevocationRegistry,
    StatusEvaluator, StatusListRevocationService, VerifiableCredentialResource,
    BITSTRING_STATUS_LIST_ENTRY,
};
use sqlx::PgPool;
use thiserror::Error;

use crate::config::NodeConfig;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid issuer policy: {0}")]
    Policy(#[from] StoreError),

    #[error("cannot build protocol client: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---- Collaborators ----

/// The external collaborators the state machines call.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn DidResolver>,
    pub http: Arc<dyn HttpClient>,
    pub sts: Arc<dyn SecureTokenService>,
    pub clock: SharedClock,
}

impl Collaborators {
    /// reqwest transport, `did:web` resolution and the remote STS.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(Duration::from_secs(
            config.http.timeout_secs,
        ))?);
        let web = WebDidResolver::new(Arc::clone(&http)).with_https(config.http.did_web_https);
        let resolver = DidResolverRegistry::new().register("web", Arc::new(web));
        let sts = RemoteSecureTokenService::new(config.sts.remote_config())?;
        Ok(Self {
            resolver: Arc::new(resolver),
            http,
            sts: Arc::new(sts),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

// ---- Stores ----

/// Where entities are persisted.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory,
    Postgres(PgPool),
}

impl StoreBackend {
    /// Postgres when `database_url` is set, memory otherwise.
    pub async fn connect(config: &NodeConfig) -> Result<Self, NodeError> {
        match &config.database_url {
            Some(url) => {
                let pool = dcp_state::postgres::init_pool(url, config.database_max_connections).await?;
                Ok(Self::Postgres(pool))
            }
            None => {
                tracing::warn!("no database_url configured, entities are kept in memory");
                Ok(Self::Memory)
            }
        }
    }

    fn store<T: Stateful>(&self, owner: &str, clock: &SharedClock, lease: chrono::Duration) -> SharedStore<T> {
        match self {
            Self::Memory => Arc::new(
                InMemoryStore::new(owner)
                    .with_clock(Arc::clone(clock))
                    .with_lease_duration(lease),
            ),
            Self::Postgres(pool) => Arc::new(
                PostgresStore::new(pool.clone(), owner)
                    .with_clock(Arc::clone(clock))
                    .with_lease_duration(lease),
            ),
        }
    }

    fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Memory => None,
            Self::Postgres(pool) => Some(pool),
        }
    }
}

// ---- Roles ----

pub struct HolderRole {
    pub manager: Arc<CredentialRequestManager>,
    pub offers: Arc<CredentialOfferService>,
    pub writer: Arc<CredentialWriter>,
}

pub struct IssuerRole {
    pub service: Arc<IssuerService>,
    pub manager: Arc<IssuanceProcessManager>,
    pub holders: HolderStore,
    pub definitions: CredentialDefinitionStore,
    /// Present when `issuer.status_list` is configured.
    pub status_lists: Option<Arc<StatusListManager>>,
    pub credential_status: Option<Arc<CredentialStatusService>>,
    own_did: String,
}

impl IssuerRole {
    /// Authenticator for inbound holder requests, verifying tokens with
    /// `verifier`.
    pub fn authenticator(&self, verifier: Arc<dyn TokenVerifier>) -> HolderAuthenticator {
        HolderAuthenticator::new(verifier, self.holders.clone(), self.own_did.clone())
    }
}

// ---- Node ----

pub struct Node {
    participant_context_id: String,
    pub credentials: SharedStore<VerifiableCredentialResource>,
    pub holder: Option<HolderRole>,
    pub issuer: Option<IssuerRole>,
    machines: Vec<StateMachine>,
}

impl Node {
    pub fn build(
        config: &NodeConfig,
        backend: &StoreBackend,
        collaborators: Collaborators,
    ) -> Result<Self, NodeError> {
        let owner = config.owner();
        let clock = collaborators.clock.clone();
        let lease = config.state_machine.lease_duration();
        let settings = config.state_machine.processor_settings();
        let wait = Arc::new(FixedWaitStrategy::new(config.state_machine.poll_interval()));

        let credentials: SharedStore<VerifiableCredentialResource> = backend.store(&owner, &clock, lease);
        let mut machines = Vec::new();

        let holder = if config.holder.enabled {
            let requests: SharedStore<HolderCredentialRequest> = backend.store(&owner, &clock, lease);
            let offers: SharedStore<CredentialOffer> = backend.store(&owner, &clock, lease);
            let manager = Arc::new(
                CredentialRequestManager::new(
                    Arc::clone(&requests),
                    Arc::clone(&collaborators.resolver),
                    Arc::clone(&collaborators.http),
                    Arc::clone(&collaborators.sts),
                    config.own_did.clone(),
                )
                .with_clock(clock.clone())
                .with_request_timeout(chrono::Duration::seconds(config.holder.request_timeout_secs)),
            );
            let offer_service = Arc::new(
                CredentialOfferService::new(offers, Arc::clone(&manager), ProfileRegistry::default())
                    .with_clock(clock.clone()),
            );
            let writer = Arc::new(
                CredentialWriter::new(requests, Arc::clone(&credentials), Arc::new(JsonCredentialParser))
                    .with_clock(clock.clone()),
            );

            let offer_processor: Arc<dyn Processor> = Arc::new(offer_service.processor(settings));
            let machine = manager
                .processors(settings)
                .into_iter()
                .chain(std::iter::once(offer_processor))
                .fold(
                    StateMachine::new("holder").with_wait_strategy(wait.clone()),
                    StateMachine::with_processor,
                );
            machines.push(machine);

            Some(HolderRole {
                manager,
                offers: offer_service,
                writer,
            })
        } else {
            None
        };

        let issuer = if config.issuer.enabled {
            let role = build_issuer(config, backend, &collaborators, &owner, Arc::clone(&credentials))?;
            let processor: Arc<dyn Processor> = Arc::new(role.manager.processor(settings));
            machines.push(
                StateMachine::new("issuer")
                    .with_wait_strategy(wait.clone())
                    .with_processor(processor),
            );
            Some(role)
        } else {
            None
        };

        if config.watchdog.enabled {
            let revocation = RevocationRegistry::new().register(
                BITSTRING_STATUS_LIST_ENTRY,
                Arc::new(StatusListRevocationService::new(Arc::clone(&collaborators.http))),
            );
            let evaluator = StatusEvaluator::new(Arc::new(revocation)).with_clock(clock.clone());
            let mut watchdog = CredentialWatchdog::new(Arc::clone(&credentials), evaluator)
                .with_clock(clock.clone())
                .with_recheck_interval(chrono::Duration::seconds(config.watchdog.recheck_interval_secs));
            if let Some(holder) = &holder {
                let reissuer: Arc<dyn CredentialReissuer> = holder.manager.clone();
                watchdog = watchdog.with_reissuance(
                    reissuer,
                    chrono::Duration::seconds(config.watchdog.reissuance_grace_period_secs),
                );
            }
            let processor: Arc<dyn Processor> = Arc::new(watchdog.into_processor().with_settings(settings));
            machines.push(
                StateMachine::new("watchdog")
                    .with_wait_strategy(wait)
                    .with_processor(processor),
            );
        }

        tracing::info!(
            participant = %config.participant_context_id,
            own_did = %config.own_did,
            owner = %owner,
            holder = holder.is_some(),
            issuer = issuer.is_some(),
            watchdog = config.watchdog.enabled,
            "node built"
        );

        Ok(Self {
            participant_context_id: config.participant_context_id.clone(),
            credentials,
            holder,
            issuer,
            machines,
        })
    }

    pub fn participant_context_id(&self) -> &str {
        &self.participant_context_id
    }

    pub fn machine_names(&self) -> Vec<&str> {
        self.machines.iter().map(StateMachine::name).collect()
    }

    /// Run every state machine once, in build order. Returns the number of
    /// entities that moved on.
    pub async fn tick(&self) -> usize {
        let mut total = 0;
        for machine in &self.machines {
            total += machine.tick().await;
        }
        total
    }

    /// Start every state machine. The node keeps its services but can no
    /// longer be ticked manually.
    pub fn start(&mut self) -> RunningNode {
        RunningNode {
            handles: self.machines.drain(..).map(StateMachine::start).collect(),
        }
    }
}

fn build_issuer(
    config: &NodeConfig,
    backend: &StoreBackend,
    collaborators: &Collaborators,
    owner: &str,
    credentials: SharedStore<VerifiableCredentialResource>,
) -> Result<IssuerRole, NodeError> {
    let clock = collaborators.clock.clone();
    let lease = config.state_machine.lease_duration();
    let processes: SharedStore<IssuanceProcess> = backend.store(owner, &clock, lease);

    let definitions = CredentialDefinitionStore::from_definitions(config.issuer.credential_definitions.clone())?;
    let attestations = AttestationDefinitionStore::from_definitions(config.issuer.attestations.clone())?;
    let holders = HolderStore::new();
    for holder in &config.issuer.holders {
        holders.create(holder.clone())?;
    }

    let mut sources = AttestationSourceRegistry::new()
        .register(PRESENTATION_ATTESTATION_TYPE, Arc::new(PresentationAttestationFactory));
    if let Some(pool) = backend.pool() {
        sources = sources.register(
            DATABASE_ATTESTATION_TYPE,
            Arc::new(DatabaseAttestationFactory::new(pool.clone())),
        );
    }

    let service = IssuerService::new(
        Arc::clone(&processes),
        definitions.clone(),
        holders.clone(),
        AttestationPipeline::new(attestations, sources),
        RuleRegistry::default(),
    )
    .with_clock(clock.clone());

    let delivery = DcpCredentialStorageClient::new(
        Arc::clone(&collaborators.resolver),
        Arc::clone(&collaborators.http),
        Arc::clone(&collaborators.sts),
        config.own_did.clone(),
    )
    .with_clock(clock.clone());
    let mut manager = IssuanceProcessManager::new(
        processes,
        definitions.clone(),
        holders.clone(),
        UnsignedJsonGenerator::new().with_clock(clock.clone()).registry(),
        Arc::new(delivery),
        Arc::clone(&credentials),
        config.own_did.clone(),
    )
    .with_clock(clock.clone());

    let (status_lists, credential_status) = match &config.issuer.status_list {
        Some(section) => {
            let lists: SharedStore<StatusListCredential> = backend.store(owner, &clock, lease);
            let status_lists = Arc::new(
                StatusListManager::new(lists, config.own_did.clone(), section.base_url.clone())
                    .with_clock(clock.clone())
                    .with_bitstring_size(section.bitstring_size),
            );
            let credential_status = CredentialStatusService::new(credentials, Arc::clone(&status_lists))
                .with_clock(clock);
            manager = manager.with_status_lists(Arc::clone(&status_lists));
            (Some(status_lists), Some(Arc::new(credential_status)))
        }
        None => (None, None),
    };

    Ok(IssuerRole {
        service: Arc::new(service),
        manager: Arc::new(manager),
        holders,
        definitions,
        status_lists,
        credential_status,
        own_did: config.own_did.clone(),
    })
}

/// The running state machines of a started [`Node`].
pub struct RunningNode {
    handles: Vec<StateMachineHandle>,
}

impl RunningNode {
    /// Stop every state machine, waiting for in-flight ticks.
    pub async fn stop(self) {
        for handle in self.handles {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dcp_core::FixedClock;
    use dcp_holder::RequestedCredential;
    use dcp_protocol::testing::{FakeTokenService, RecordingHttpClient, StaticDidResolver};

    const CONFIG: &str = r#"
participant_context_id: acme
own_did: did:web:acme.example
instance_id: node-1
sts:
  token_url: https://sts.acme.example/token
  client_id: acme
  client_secret: s3cret
issuer:
  enabled: true
  holders:
    - holderId: holder-1
      did: did:web:holder.example
  attestations:
    - id: presented
      attestationType: presentation
      configuration: { credentialType: MembershipCredential, required: false }
  credential_definitions:
    - id: membership
      credentialType: MembershipCredential
      format: VC1_0_JWT
      attestations: [presented]
  status_list:
    base_url: https://acme.example/api/status
"#;

    fn collaborators(http: Arc<RecordingHttpClient>) -> Collaborators {
        Collaborators {
            resolver: Arc::new(StaticDidResolver::new()),
            http,
            sts: FakeTokenService::new().shared(),
            clock: Arc::new(FixedClock::new(Utc::now())),
        }
    }

    fn config() -> NodeConfig {
        let config = NodeConfig::from_yaml(CONFIG).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn builds_all_roles() {
        let http = Arc::new(RecordingHttpClient::always_ok(""));
        let node = Node::build(&config(), &StoreBackend::Memory, collaborators(http)).unwrap();
        assert_eq!(node.machine_names(), vec!["holder", "issuer", "watchdog"]);
        assert_eq!(node.participant_context_id(), "acme");
        let issuer = node.issuer.as_ref().unwrap();
        assert!(issuer.definitions.find_by_type("MembershipCredential").is_some());
        assert!(issuer.holders.find_by_did("did:web:holder.example").is_some());
        assert!(issuer.status_lists.is_some());
        assert!(issuer.credential_status.is_some());
    }

    #[test]
    fn status_lists_are_optional() {
        let mut config = config();
        config.issuer.status_list = None;
        let http = Arc::new(RecordingHttpClient::always_ok(""));
        let node = Node::build(&config, &StoreBackend::Memory, collaborators(http)).unwrap();
        let issuer = node.issuer.as_ref().unwrap();
        assert!(issuer.status_lists.is_none());
        assert!(issuer.credential_status.is_none());
    }

    #[test]
    fn disabled_roles_are_skipped() {
        let mut config = config();
        config.holder.enabled = false;
        config.issuer.enabled = false;
        config.watchdog.enabled = false;
        let http = Arc::new(RecordingHttpClient::always_ok(""));
        let node = Node::build(&config, &StoreBackend::Memory, collaborators(http)).unwrap();
        assert!(node.machine_names().is_empty());
        assert!(node.holder.is_none() && node.issuer.is_none());
    }

    #[test]
    fn duplicate_holders_fail_the_build() {
        let mut config = config();
        let holder = config.issuer.holders[0].clone();
        config.issuer.holders.push(holder);
        let http = Arc::new(RecordingHttpClient::always_ok(""));
        let err = Node::build(&config, &StoreBackend::Memory, collaborators(http)).err().unwrap();
        assert!(matches!(err, NodeError::Policy(_)));
    }

    #[tokio::test]
    async fn tick_drives_holder_requests() {
        let http = Arc::new(RecordingHttpClient::always_ok(""));
        let node = Node::build(&config(), &StoreBackend::Memory, collaborators(http.clone())).unwrap();
        let holder = node.holder.as_ref().unwrap();
        holder
            .manager
            .initiate_request(
                "acme",
                "did:web:issuer.example",
                "req-1",
                vec![RequestedCredential::new("membership", "MembershipCredential", "VC1_0_JWT")],
            )
            .await
            .unwrap();

        // The static resolver knows no documents, so the request fails
        // before any HTTP call.
        assert_eq!(node.tick().await, 1);
        assert_eq!(http.request_count(), 0);
        let request = holder.manager.store().find_by_id("req-1").await.unwrap().unwrap();
        assert!(request.error_detail().is_some());
    }

    #[tokio::test]
    async fn started_node_stops_cleanly() {
        let http = Arc::new(RecordingHttpClient::always_ok(""));
        let mut node = Node::build(&config(), &StoreBackend::Memory, collaborators(http)).unwrap();
        let running = node.start();
        assert!(node.machine_names().is_empty());
        running.stop().await;
    }
}

//! # Credential Request Manager
//!
//! Creates holder credential requests and drives them to completion.
//!
//! ## Processors
//!
//! | Source states | Handler | Effect |
//! |---|---|---|
//! | `CREATED`, `REQUESTING` | [`CredentialRequestManager::process_initial`] | resolve issuer endpoint, send the request, record `issuerPid` |
//! | `REQUESTED` | [`CredentialRequestManager::process_requested`] | enforce the timeout, poll the issuer for status |
//!
//! An inconclusive poll requeues the request, so the next poll waits for
//! the state machine's poll interval.
//!
//! Every failure ends in `ERROR` with the failure message as `errorDetail`,
//! persisted by one final `save`. The intermediate `REQUESTING` write is an
//! `update` that keeps this instance's lease. Nothing is retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dcp_core::{
    Did, ServiceError, ServiceResult, SharedClock, StateCode, Stateful, SystemClock,
};
use dcp_protocol::{
    CredentialRequestMessage, CredentialRequestSpecifier, CredentialRequestStatus,
    CredentialStatusMessage, DidResolver, HttpClient, HttpRequest, ProtocolError,
    SecureTokenService, TokenClaims, ISSUER_SERVICE_TYPES,
};
use dcp_state::{
    handler_fn, HandlerOutcome, ProcessError, Processor, ProcessorSettings, SharedStore,
    StateFilter, StateMachineProcessor,
};

use dcp_vc::{CredentialReissuer, ReissuanceRequest};
use uuid::Uuid;

use crate::request::{HolderCredentialRequest, HolderRequestState, RequestedCredential};

/// Default time a request may stay `REQUESTED` before it is abandoned.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: i64 = 3600;

pub struct CredentialRequestManager {
    store: SharedStore<HolderCredentialRequest>,
    resolver: Arc<dyn DidResolver>,
    http: Arc<dyn HttpClient>,
    sts: Arc<dyn SecureTokenService>,
    own_did: String,
    clock: SharedClock,
    request_timeout: Duration,
}

impl CredentialRequestManager {
    pub fn new(
        store: SharedStore<HolderCredentialRequest>,
        resolver: Arc<dyn DidResolver>,
        http: Arc<dyn HttpClient>,
        sts: Arc<dyn SecureTokenService>,
        own_did: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            http,
            sts,
            own_did: own_did.into(),
            clock: Arc::new(SystemClock),
            request_timeout: Duration::seconds(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn store(&self) -> &SharedStore<HolderCredentialRequest> {
        &self.store
    }

    /// Create a request in `CREATED`. The id doubles as the `holderPid`.
    pub async fn initiate_request(
        &self,
        participant_context_id: &str,
        issuer_did: &str,
        request_id: &str,
        credentials: Vec<RequestedCredential>,
    ) -> ServiceResult<String> {
        Did::new(issuer_did).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        if credentials.is_empty() {
            return Err(ServiceError::BadRequest("No credentials requested".into()));
        }
        if request_id.trim().is_empty() {
            return Err(ServiceError::BadRequest("Request id must not be empty".into()));
        }

        let request = HolderCredentialRequest::new(
            request_id,
            participant_context_id,
            issuer_did,
            credentials,
            self.clock.now(),
        );
        self.store.create(&request).await?;
        tracing::info!(entity_id = %request_id, issuer = %issuer_did, "credential request created");
        Ok(request_id.to_string())
    }

    /// The processors for this manager, in claim order.
    pub fn processors(self: &Arc<Self>, settings: ProcessorSettings) -> Vec<Arc<dyn Processor>> {
        let manager = Arc::clone(self);
        let initial: Arc<dyn Processor> = Arc::new(
            StateMachineProcessor::new(
                "holder-request-initial",
                Arc::clone(&self.store),
                StateFilter::any_of([
                    HolderRequestState::Created.code(),
                    HolderRequestState::Requesting.code(),
                ]),
                Arc::new(handler_fn(move |request: HolderCredentialRequest| {
                    let manager = Arc::clone(&manager);
                    async move { manager.process_initial(request).await }
                })),
            )
            .with_settings(settings),
        );

        let manager = Arc::clone(self);
        let requested: Arc<dyn Processor> = Arc::new(
            StateMachineProcessor::new(
                "holder-request-requested",
                Arc::clone(&self.store),
                StateFilter::has_state(HolderRequestState::Requested.code()),
                Arc::new(handler_fn(move |request: HolderCredentialRequest| {
                    let manager = Arc::clone(&manager);
                    async move { manager.process_requested(request).await }
                })),
            )
            .with_settings(settings),
        );

        vec![initial, requested]
    }

    // ---- Handlers ----

    /// `CREATED | REQUESTING` → `REQUESTING` → `REQUESTED`.
    pub async fn process_initial(
        &self,
        mut request: HolderCredentialRequest,
    ) -> Result<HandlerOutcome, ProcessError> {
        tracing::debug!(entity_id = %request.id(), state = request.state(), "sending credential request");

        let endpoint = match self.issuer_endpoint(&request.issuer_did).await {
            Ok(endpoint) => endpoint,
            Err(detail) => return self.fail(request, detail).await,
        };

        request.transition_requesting(self.clock.now())?;
        self.store.update(&request).await?;

        let token = match self.self_issued_token(&request.issuer_did).await {
            Ok(token) => token,
            Err(e) => return self.fail(request, e.message()).await,
        };

        let message = CredentialRequestMessage {
            holder_pid: request.holder_pid().to_string(),
            credentials: request
                .requested_credentials
                .iter()
                .map(|c| CredentialRequestSpecifier::new(&c.credential_type, &c.format))
                .collect(),
        };
        let body = match serde_json::to_value(&message) {
            Ok(body) => body,
            Err(e) => return self.fail(request, e.to_string()).await,
        };
        let http_request =
            HttpRequest::post_json(format!("{endpoint}/credentials"), body).with_bearer(token);

        let issuer_pid = match self.http.execute(http_request).await {
            Ok(response) => parse_process_id(&response.body),
            Err(e) => return self.fail(request, e.message()).await,
        };
        let Some(issuer_pid) = issuer_pid else {
            return self
                .fail(request, "Issuer returned no process id for the credential request")
                .await;
        };

        request.transition_requested(&issuer_pid, self.clock.now())?;
        self.store.save(&request).await?;
        tracing::info!(entity_id = %request.id(), issuer_pid = %issuer_pid, "credential request acknowledged");
        Ok(HandlerOutcome::Processed)
    }

    /// `REQUESTED` → `ISSUED` | `REQUESTED` (re-queued) | `ERROR`.
    pub async fn process_requested(
        &self,
        mut request: HolderCredentialRequest,
    ) -> Result<HandlerOutcome, ProcessError> {
        let now = self.clock.now();
        let since = request.requested_at.unwrap_or(request.entity.state_timestamp);
        let age = now - since;
        if age > self.request_timeout {
            let detail = format!(
                "Time limit exceeded: request '{}' has been in state '{}' for {}s. Limit = {}s",
                request.id(),
                HolderRequestState::Requested,
                age.num_seconds(),
                self.request_timeout.num_seconds()
            );
            return self.fail(request, detail).await;
        }

        let Some(issuer_pid) = request.issuer_pid.clone() else {
            return self.fail(request, "Request has no issuer process id").await;
        };
        let endpoint = match self.issuer_endpoint(&request.issuer_did).await {
            Ok(endpoint) => endpoint,
            Err(detail) => return self.fail(request, detail).await,
        };
        let token = match self.self_issued_token(&request.issuer_did).await {
            Ok(token) => token,
            Err(e) => return self.fail(request, e.message()).await,
        };
        let response = match self
            .http
            .execute(HttpRequest::get(format!("{endpoint}/request/{issuer_pid}")).with_bearer(token))
            .await
        {
            Ok(response) => response,
            Err(e) => return self.fail(request, e.message()).await,
        };

        let reported = response
            .json::<CredentialStatusMessage>()
            .map(|m| m.status)
            .unwrap_or_else(|_| response.body.trim().to_string());

        match reported.parse::<CredentialRequestStatus>() {
            Ok(CredentialRequestStatus::Received) => {
                request.requeue(self.clock.now())?;
                self.store.save(&request).await?;
                Ok(HandlerOutcome::Requeued)
            }
            Ok(CredentialRequestStatus::Issued) => {
                request.transition_issued(issuer_pid, self.clock.now())?;
                self.store.save(&request).await?;
                tracing::info!(entity_id = %request.id(), "issuer reports credentials issued");
                Ok(HandlerOutcome::Processed)
            }
            Ok(CredentialRequestStatus::Rejected) => {
                self.fail(request, "The credential request has been rejected by the Issuer")
                    .await
            }
            Err(_) => {
                let detail = format!(
                    "Invalid status response received from Issuer: '{}'",
                    response.body
                );
                self.fail(request, detail).await
            }
        }
    }

    // ---- Helpers ----

    /// The issuer's credential request endpoint, without trailing slash.
    async fn issuer_endpoint(&self, issuer_did: &str) -> Result<String, String> {
        let document = self
            .resolver
            .resolve(issuer_did)
            .await
            .map_err(|e| e.message().to_string())?;
        document
            .find_any_service(&ISSUER_SERVICE_TYPES)
            .map(|s| s.service_endpoint.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                format!(
                    "The Issuer's DID Document does not contain any '{}' endpoint",
                    ISSUER_SERVICE_TYPES[0]
                )
            })
    }

    async fn self_issued_token(&self, audience: &str) -> Result<String, ProtocolError> {
        let claims = TokenClaims::self_issued(&self.own_did, audience, self.clock.now());
        Ok(self.sts.create_token(&claims, None).await?.token)
    }

    async fn fail(
        &self,
        mut request: HolderCredentialRequest,
        detail: impl Into<String>,
    ) -> Result<HandlerOutcome, ProcessError> {
        let detail = detail.into();
        tracing::warn!(entity_id = %request.id(), state = request.state(), error = %detail, "credential request failed");
        request.transition_error(detail, self.clock.now())?;
        self.store.save(&request).await?;
        Ok(HandlerOutcome::Processed)
    }
}

/// Re-issuance sends a fresh request for the credential object the
/// expiring credential was issued under.
#[async_trait]
impl CredentialReissuer for CredentialRequestManager {
    async fn reissue(&self, request: ReissuanceRequest) -> ServiceResult<String> {
        let requested = RequestedCredential::new(
            request.credential_object_id,
            request.credential_type,
            request.format.as_str(),
        );
        self.initiate_request(
            &request.participant_context_id,
            &request.issuer_did,
            &Uuid::new_v4().to_string(),
            vec![requested],
        )
        .await
    }
}

/// The issuer answers a credential request with its process id, either
/// as plain text or as a JSON string.
fn parse_process_id(body: &str) -> Option<String> {
    let pid = serde_json::from_str::<String>(body).unwrap_or_else(|_| body.trim().to_string());
    (!pid.is_empty()).then_some(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use dcp_core::{FixedClock, QuerySpec, StoreError};
    use dcp_protocol::testing::{FakeTokenService, RecordingHttpClient, StaticDidResolver};
    use dcp_protocol::{DidDocument, HttpMethod, HttpResponse, Service};
    use dcp_state::{FixedWaitStrategy, InMemoryStore, LeasableStore, StateMachine};
    use parking_lot::Mutex;
    use serde_json::json;

    const HOLDER: &str = "did:web:holder";
    const ISSUER: &str = "did:web:issuer";

    /// Records the state and the operation of every write.
    struct RecordingStore {
        inner: InMemoryStore<HolderCredentialRequest>,
        writes: Mutex<Vec<(&'static str, i32)>>,
    }

    impl RecordingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryStore::new("node-a"),
                writes: Mutex::new(Vec::new()),
            })
        }

        fn writes(&self) -> Vec<(&'static str, i32)> {
            self.writes.lock().clone()
        }
    }

    #[async_trait]
    impl LeasableStore<HolderCredentialRequest> for RecordingStore {
        fn owner(&self) -> &str {
            self.inner.owner()
        }
        async fn save(&self, e: &HolderCredentialRequest) -> Result<(), StoreError> {
            self.writes.lock().push(("save", e.state()));
            self.inner.save(e).await
        }
        async fn create(&self, e: &HolderCredentialRequest) -> Result<(), StoreError> {
            self.writes.lock().push(("create", e.state()));
            self.inner.create(e).await
        }
        async fn update(&self, e: &HolderCredentialRequest) -> Result<(), StoreError> {
            self.writes.lock().push(("update", e.state()));
            self.inner.update(e).await
        }
        async fn find_by_id(&self, id: &str) -> Result<Option<HolderCredentialRequest>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_id_and_lease(&self, id: &str) -> Result<HolderCredentialRequest, StoreError> {
            self.inner.find_by_id_and_lease(id).await
        }
        async fn next_not_leased(
            &self,
            limit: usize,
            filter: &StateFilter,
        ) -> Result<Vec<HolderCredentialRequest>, StoreError> {
            self.inner.next_not_leased(limit, filter).await
        }
        async fn query(&self, spec: &QuerySpec) -> Result<Vec<HolderCredentialRequest>, StoreError> {
            self.inner.query(spec).await
        }
        async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete_by_id(id).await
        }
        async fn break_lease(&self, id: &str) -> Result<(), StoreError> {
            self.inner.break_lease(id).await
        }
    }

    fn issuer_document() -> DidDocument {
        DidDocument::new(ISSUER).with_service(Service::new(
            "#issuer",
            "IssuerService",
            "https://issuer.example/api/issuance/",
        ))
    }

    struct Fixture {
        store: Arc<RecordingStore>,
        resolver: Arc<StaticDidResolver>,
        http: Arc<RecordingHttpClient>,
        sts: Arc<FakeTokenService>,
        clock: Arc<FixedClock>,
        manager: Arc<CredentialRequestManager>,
    }

    fn fixture(resolver: StaticDidResolver, http: RecordingHttpClient, sts: FakeTokenService) -> Fixture {
        let store = RecordingStore::new();
        let resolver = Arc::new(resolver);
        let http = Arc::new(http);
        let sts = Arc::new(sts);
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = Arc::new(
            CredentialRequestManager::new(
                store.clone(),
                resolver.clone(),
                http.clone(),
                sts.clone(),
                HOLDER,
            )
            .with_clock(clock.clone()),
        );
        Fixture {
            store,
            resolver,
            http,
            sts,
            clock,
            manager,
        }
    }

    fn membership() -> Vec<RequestedCredential> {
        vec![RequestedCredential::new("obj-1", "MembershipCredential", "VC1_0_JWT")]
    }

    async fn run_initial(f: &Fixture) {
        let processors = f.manager.processors(ProcessorSettings::default());
        assert_eq!(processors[0].process().await, 1);
    }

    async fn stored(f: &Fixture, id: &str) -> HolderCredentialRequest {
        f.store.find_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn initiate_request_creates_entity_in_created() {
        let f = fixture(StaticDidResolver::new(), RecordingHttpClient::always_ok(""), FakeTokenService::new());
        let id = f
            .manager
            .initiate_request("participant-1", ISSUER, "req-1", membership())
            .await
            .unwrap();
        assert_eq!(id, "req-1");
        let r = stored(&f, "req-1").await;
        assert_eq!(r.current_state(), Some(HolderRequestState::Created));
        assert_eq!(r.participant_context_id, "participant-1");
    }

    #[tokio::test]
    async fn initiate_request_rejects_duplicates_and_bad_input() {
        let f = fixture(StaticDidResolver::new(), RecordingHttpClient::always_ok(""), FakeTokenService::new());
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        let dup = f
            .manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap_err();
        assert!(matches!(dup, ServiceError::Conflict(_)));

        let empty = f.manager.initiate_request("p", ISSUER, "req-2", vec![]).await;
        assert_eq!(empty, Err(ServiceError::BadRequest("No credentials requested".into())));
        let bad_did = f.manager.initiate_request("p", "issuer", "req-3", membership()).await;
        assert!(matches!(bad_did, Err(ServiceError::BadRequest(_))));
    }

    #[tokio::test]
    async fn reissuance_creates_a_fresh_request() {
        let f = fixture(StaticDidResolver::new(), RecordingHttpClient::always_ok(""), FakeTokenService::new());
        let id = f
            .manager
            .reissue(ReissuanceRequest {
                participant_context_id: "participant-1".into(),
                issuer_did: ISSUER.into(),
                credential_object_id: "obj-1".into(),
                credential_type: "MembershipCredential".into(),
                format: dcp_vc::CredentialFormat::Vc1Jwt,
            })
            .await
            .unwrap();

        let r = stored(&f, &id).await;
        assert_eq!(r.current_state(), Some(HolderRequestState::Created));
        assert_eq!(r.issuer_did, ISSUER);
        assert_eq!(r.requested_credentials, membership());
    }

    #[tokio::test]
    async fn created_request_goes_through_requesting_to_requested() {
        let f = fixture(
            StaticDidResolver::new().with_document(issuer_document()),
            RecordingHttpClient::always_ok("issuer-pid-42"),
            FakeTokenService::new(),
        );
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        run_initial(&f).await;

        let requesting = HolderRequestState::Requesting.code();
        let requested = HolderRequestState::Requested.code();
        assert_eq!(
            f.store.writes(),
            vec![("create", 100), ("update", requesting), ("save", requested)]
        );

        let r = stored(&f, "req-1").await;
        assert_eq!(r.issuer_pid.as_deref(), Some("issuer-pid-42"));
        assert!(r.entity.leased_by.is_none());

        let minted = f.sts.minted();
        assert_eq!(minted.len(), 1);
        assert_eq!((minted[0].iss.as_str(), minted[0].aud.as_str()), (HOLDER, ISSUER));

        let sent = f.http.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[0].url, "https://issuer.example/api/issuance/credentials");
        assert!(sent[0].bearer_token.as_deref().is_some_and(|t| t.starts_with("fake.")));
        assert_eq!(
            sent[0].body,
            Some(json!({
                "holderPid": "req-1",
                "credentials": [{"credentialType": "MembershipCredential", "format": "VC1_0_JWT"}]
            }))
        );
    }

    #[tokio::test]
    async fn resolution_failure_errors_without_token_or_http() {
        let f = fixture(
            StaticDidResolver::new().with_failure(ISSUER, "foobar"),
            RecordingHttpClient::always_ok("issuer-pid-42"),
            FakeTokenService::new(),
        );
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        run_initial(&f).await;

        let r = stored(&f, "req-1").await;
        assert_eq!(r.current_state(), Some(HolderRequestState::Error));
        assert_eq!(r.error_detail(), Some("foobar"));
        assert_eq!(f.sts.mint_count(), 0);
        assert_eq!(f.http.request_count(), 0);
        assert_eq!(f.resolver.calls(), vec![ISSUER.to_string()]);
        assert_eq!(f.store.writes(), vec![("create", 100), ("save", -1)]);
    }

    #[tokio::test]
    async fn missing_issuer_service_is_permanent_error() {
        let f = fixture(
            StaticDidResolver::new().with_document(DidDocument::new(ISSUER)),
            RecordingHttpClient::always_ok(""),
            FakeTokenService::new(),
        );
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        run_initial(&f).await;

        let r = stored(&f, "req-1").await;
        assert_eq!(
            r.error_detail(),
            Some("The Issuer's DID Document does not contain any 'IssuerService' endpoint")
        );
        // terminal: never reclaimed
        let processors = f.manager.processors(ProcessorSettings::default());
        assert_eq!(processors[0].process().await, 0);
        assert_eq!(processors[1].process().await, 0);
    }

    #[tokio::test]
    async fn token_and_http_failures_end_in_error() {
        let f = fixture(
            StaticDidResolver::new().with_document(issuer_document()),
            RecordingHttpClient::always_ok("pid"),
            FakeTokenService::failing("sts unavailable"),
        );
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        run_initial(&f).await;
        assert_eq!(stored(&f, "req-1").await.error_detail(), Some("sts unavailable"));
        assert_eq!(f.http.request_count(), 0);

        let f = fixture(
            StaticDidResolver::new().with_document(issuer_document()),
            RecordingHttpClient::always_failing("connection refused"),
            FakeTokenService::new(),
        );
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        run_initial(&f).await;
        let r = stored(&f, "req-1").await;
        assert_eq!(r.current_state(), Some(HolderRequestState::Error));
        assert_eq!(r.error_detail(), Some("connection refused"));
    }

    async fn requested_fixture(status_body: impl Into<String>) -> Fixture {
        let status_body = status_body.into();
        let f = fixture(
            StaticDidResolver::new().with_document(issuer_document()),
            RecordingHttpClient::new(move |req| {
                Ok(HttpResponse::ok(match req.method {
                    HttpMethod::Post => "issuer-pid-42".to_string(),
                    HttpMethod::Get => status_body.clone(),
                }))
            }),
            FakeTokenService::new(),
        );
        f.manager
            .initiate_request("p", ISSUER, "req-1", membership())
            .await
            .unwrap();
        run_initial(&f).await;
        f
    }

    /// Run the polling processor; returns how many requests moved on.
    async fn run_requested(f: &Fixture) -> usize {
        let processors = f.manager.processors(ProcessorSettings::default());
        processors[1].process().await
    }

    #[tokio::test]
    async fn status_poll_outcomes() {
        let received = json!({"holderPid": "req-1", "issuerPid": "issuer-pid-42", "status": "RECEIVED"});
        let f = requested_fixture(received.to_string()).await;
        assert_eq!(run_requested(&f).await, 0);
        let r = stored(&f, "req-1").await;
        assert_eq!(r.current_state(), Some(HolderRequestState::Requested));
        assert_eq!(r.entity.state_count, 2);
        assert_eq!(
            f.http.requests()[1].url,
            "https://issuer.example/api/issuance/request/issuer-pid-42"
        );

        let f = requested_fixture("ISSUED").await;
        assert_eq!(run_requested(&f).await, 1);
        assert_eq!(stored(&f, "req-1").await.current_state(), Some(HolderRequestState::Issued));

        let f = requested_fixture("REJECTED").await;
        assert_eq!(run_requested(&f).await, 1);
        assert_eq!(
            stored(&f, "req-1").await.error_detail(),
            Some("The credential request has been rejected by the Issuer")
        );

        let f = requested_fixture("PENDING").await;
        assert_eq!(run_requested(&f).await, 1);
        assert_eq!(
            stored(&f, "req-1").await.error_detail(),
            Some("Invalid status response received from Issuer: 'PENDING'")
        );
    }

    #[tokio::test]
    async fn requested_times_out_from_first_entry() {
        let f = requested_fixture("RECEIVED").await;
        f.clock.advance(Duration::minutes(40));
        assert_eq!(run_requested(&f).await, 0);
        f.clock.advance(Duration::minutes(40));
        assert_eq!(run_requested(&f).await, 1);

        let r = stored(&f, "req-1").await;
        assert_eq!(r.current_state(), Some(HolderRequestState::Error));
        assert!(r
            .error_detail()
            .is_some_and(|d| d.starts_with("Time limit exceeded: request 'req-1'")));
        // one POST, one status GET before the timeout
        assert_eq!(f.http.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn running_machine_polls_once_per_interval() {
        let f = requested_fixture("RECEIVED").await;
        let machine = f
            .manager
            .processors(ProcessorSettings::default())
            .into_iter()
            .fold(StateMachine::new("holder-requests"), StateMachine::with_processor)
            .with_wait_strategy(Arc::new(FixedWaitStrategy::new(std::time::Duration::from_secs(1))));

        let handle = machine.start();
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        handle.stop().await;

        // The POST, then one status poll at 0s, 1s and 2s.
        assert_eq!(f.http.request_count(), 4);
        assert_eq!(stored(&f, "req-1").await.current_state(), Some(HolderRequestState::Requested));
    }

    #[test]
    fn process_id_parsing() {
        assert_eq!(parse_process_id(" abc \n"), Some("abc".into()));
        assert_eq!(parse_process_id("\"abc\""), Some("abc".into()));
        assert_eq!(parse_process_id(""), None);
    }
}

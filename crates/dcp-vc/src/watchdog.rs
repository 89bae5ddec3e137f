//! # Credential Watchdog
//!
//! Periodically re-derives the status of stored credentials.
//!
//! The watchdog is an [`EntityHandler`] over [`VerifiableCredentialResource`]
//! claimed in the statuses that can still change (`ISSUED`, `NOT_YET_VALID`,
//! `SUSPENDED`, `EXPIRED`). An expired credential stays watched so a later
//! revocation still moves it to `REVOKED`. A credential whose status was
//! recorded less than `recheck_interval` ago is handed back untouched.
//!
//! Every checked credential is saved, changed or not, so its
//! `stateTimestamp` moves and the oldest-first claim order walks the whole
//! store. Only a status change (or a re-issuance) counts as progress; an
//! unchanged credential is requeued.
//!
//! ## Re-issuance
//!
//! With a [`CredentialReissuer`] configured, a credential whose expiry is
//! less than the grace period away is re-requested from its issuer once.
//! The new request id is kept at [`REISSUANCE_REQUEST_ID`] and the
//! credential moves to [`VcIssuanceState::ReissueRequested`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dcp_core::{SharedClock, Stateful, SystemClock};
use dcp_state::{
    EntityHandler, HandlerOutcome, ProcessError, SharedStore, StateFilter, StateMachineProcessor,
};
use serde_json::Value;

use crate::reissue::{CredentialReissuer, ReissuanceRequest, REISSUANCE_REQUEST_ID};
use crate::resource::{VcIssuanceState, VcStatus, VerifiableCredentialResource};
use crate::status::StatusEvaluator;

/// Default minimum time between two checks of one credential.
pub const DEFAULT_RECHECK_INTERVAL_SECS: i64 = 3600;

/// Default time before expiry at which re-issuance starts.
pub const DEFAULT_REISSUANCE_GRACE_PERIOD_SECS: i64 = 7 * 24 * 3600;

pub struct CredentialWatchdog {
    store: SharedStore<VerifiableCredentialResource>,
    evaluator: StatusEvaluator,
    clock: SharedClock,
    recheck_interval: Duration,
    reissuer: Option<Arc<dyn CredentialReissuer>>,
    grace_period: Duration,
}

impl CredentialWatchdog {
    pub fn new(store: SharedStore<VerifiableCredentialResource>, evaluator: StatusEvaluator) -> Self {
        Self {
            store,
            evaluator,
            clock: Arc::new(SystemClock),
            recheck_interval: Duration::seconds(DEFAULT_RECHECK_INTERVAL_SECS),
            reissuer: None,
            grace_period: Duration::seconds(DEFAULT_REISSUANCE_GRACE_PERIOD_SECS),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    /// Re-request credentials expiring within `grace_period`.
    pub fn with_reissuance(mut self, reissuer: Arc<dyn CredentialReissuer>, grace_period: Duration) -> Self {
        self.reissuer = Some(reissuer);
        self.grace_period = grace_period;
        self
    }

    /// Statuses the watchdog claims.
    pub fn watched_states() -> StateFilter {
        StateFilter::any_of([
            VcStatus::Issued.code(),
            VcStatus::NotYetValid.code(),
            VcStatus::Suspended.code(),
            VcStatus::Expired.code(),
        ])
    }

    /// A processor driving this watchdog over its store.
    pub fn into_processor(self) -> StateMachineProcessor<VerifiableCredentialResource> {
        let store = Arc::clone(&self.store);
        StateMachineProcessor::new(
            "credential-watchdog",
            store,
            Self::watched_states(),
            Arc::new(self),
        )
    }

    fn reissuance_due(&self, credential: &VerifiableCredentialResource, status: VcStatus, now: DateTime<Utc>) -> bool {
        if self.reissuer.is_none()
            || credential.issuance_state != VcIssuanceState::Issued
            || matches!(status, VcStatus::Revoked | VcStatus::Other)
        {
            return false;
        }
        credential
            .verifiable_credential
            .credential
            .expiration_date
            .is_some_and(|exp| now > exp - self.grace_period)
    }

    /// Send the re-issuance request. Returns whether one was sent.
    async fn reissue(&self, credential: &mut VerifiableCredentialResource) -> bool {
        let Some(reissuer) = &self.reissuer else {
            return false;
        };
        let Some(request) = ReissuanceRequest::for_resource(credential) else {
            tracing::warn!(
                entity_id = %credential.id(),
                "no credentialObjectId metadata, cannot re-issue credential"
            );
            return false;
        };
        match reissuer.reissue(request).await {
            Ok(request_id) => {
                tracing::info!(
                    entity_id = %credential.id(),
                    request_id = %request_id,
                    "re-issuance requested"
                );
                credential.issuance_state = VcIssuanceState::ReissueRequested;
                credential
                    .metadata
                    .insert(REISSUANCE_REQUEST_ID.to_string(), Value::String(request_id));
                true
            }
            Err(e) => {
                tracing::warn!(entity_id = %credential.id(), error = %e, "re-issuance request failed");
                false
            }
        }
    }
}

#[async_trait]
impl EntityHandler<VerifiableCredentialResource> for CredentialWatchdog {
    async fn handle(
        &self,
        mut credential: VerifiableCredentialResource,
    ) -> Result<HandlerOutcome, ProcessError> {
        let now = self.clock.now();
        if now - credential.entity.state_timestamp < self.recheck_interval {
            return Ok(HandlerOutcome::NotProcessed);
        }

        let previous = credential.status();
        let status = match self.evaluator.status(&credential).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(entity_id = %credential.id(), error = %e, "credential status check failed");
                credential.entity.error_detail = Some(e.to_string());
                VcStatus::Other
            }
        };
        let mut changed = previous != Some(status);
        if changed {
            tracing::info!(
                entity_id = %credential.id(),
                from = ?previous,
                to = %status,
                "credential status changed"
            );
        }
        credential.set_status(status, now);

        if self.reissuance_due(&credential, status, now) {
            changed |= self.reissue(&mut credential).await;
        }

        self.store.save(&credential).await?;
        Ok(if changed {
            HandlerOutcome::Processed
        } else {
            HandlerOutcome::Requeued
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialStatusEntry;
    use crate::reissue::CREDENTIAL_OBJECT_ID;
    use crate::resource::tests::{credential, resource};
    use crate::revocation::tests::FixedRevocationService;
    use crate::revocation::{RevocationError, RevocationRegistry, REVOCATION};
    use dcp_core::{FixedClock, ServiceError, ServiceResult};
    use dcp_state::{BatchReport, InMemoryStore, LeasableStore, Processor};
    use parking_lot::Mutex;
    use serde_json::{json, Map};

    fn revocable(
        id: &str,
        issuance: DateTime<Utc>,
        expiration: Option<DateTime<Utc>>,
        created: DateTime<Utc>,
    ) -> VerifiableCredentialResource {
        let mut vc = credential(&["VerifiableCredential", "MembershipCredential"], issuance, expiration);
        let mut properties = Map::new();
        properties.insert("statusPurpose".into(), json!("revocation"));
        vc.credential_status = vec![CredentialStatusEntry {
            id: None,
            status_type: "BitstringStatusListEntry".into(),
            properties,
        }];
        let mut r = resource(id, "p1", vc);
        r.entity.state_timestamp = created;
        r
    }

    /// Records re-issuance requests; fails them when `fail` is set.
    #[derive(Default)]
    struct RecordingReissuer {
        requests: Mutex<Vec<ReissuanceRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl CredentialReissuer for RecordingReissuer {
        async fn reissue(&self, request: ReissuanceRequest) -> ServiceResult<String> {
            if self.fail {
                return Err(ServiceError::BadRequest("issuer unknown".into()));
            }
            self.requests.lock().push(request);
            Ok(format!("reissue-{}", self.requests.lock().len()))
        }
    }

    fn watchdog(
        signal: Result<Option<String>, RevocationError>,
        now: DateTime<Utc>,
    ) -> (InMemoryStore<VerifiableCredentialResource>, CredentialWatchdog) {
        let clock: SharedClock = Arc::new(FixedClock::new(now));
        let store = InMemoryStore::new("node-a").with_clock(Arc::clone(&clock));
        let registry = RevocationRegistry::new().register(
            "BitstringStatusListEntry",
            Arc::new(FixedRevocationService(signal)),
        );
        let evaluator = StatusEvaluator::new(Arc::new(registry)).with_clock(Arc::clone(&clock));
        let watchdog = CredentialWatchdog::new(Arc::new(store.clone()), evaluator).with_clock(clock);
        (store, watchdog)
    }

    fn setup(
        signal: Result<Option<String>, RevocationError>,
        now: DateTime<Utc>,
    ) -> (InMemoryStore<VerifiableCredentialResource>, StateMachineProcessor<VerifiableCredentialResource>) {
        let (store, watchdog) = watchdog(signal, now);
        (store, watchdog.into_processor())
    }

    #[tokio::test]
    async fn revoked_credentials_leave_the_watch_set() {
        let now = Utc::now();
        let (store, processor) = setup(Ok(Some(REVOCATION.into())), now);
        store
            .save(&revocable("c1", now - Duration::days(2), None, now - Duration::days(2)))
            .await
            .unwrap();

        assert_eq!(processor.process_batch().await.unwrap(), BatchReport { claimed: 1, progressed: 1 });
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.status(), Some(VcStatus::Revoked));
        assert!(c1.entity.leased_by.is_none());
        assert_eq!(processor.process_batch().await.unwrap(), BatchReport::default());
    }

    #[tokio::test]
    async fn recently_checked_credentials_are_skipped() {
        let now = Utc::now();
        let (store, processor) = setup(Ok(Some(REVOCATION.into())), now);
        store
            .save(&revocable("fresh", now - Duration::days(2), None, now - Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(processor.process_batch().await.unwrap(), BatchReport { claimed: 1, progressed: 0 });
        assert_eq!(processor.process().await, 0);
        let fresh = store.find_by_id("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status(), Some(VcStatus::Issued));
        assert!(fresh.entity.leased_by.is_none());
    }

    #[tokio::test]
    async fn unchanged_credentials_are_requeued() {
        let now = Utc::now();
        let (store, processor) = setup(Ok(None), now);
        let created = now - Duration::days(2);
        store
            .save(&revocable("c1", created, None, created))
            .await
            .unwrap();

        assert_eq!(processor.process_batch().await.unwrap(), BatchReport { claimed: 1, progressed: 0 });
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.status(), Some(VcStatus::Issued));
        assert_eq!(c1.entity.state_count, 2);
        assert_eq!(c1.entity.state_timestamp, now);
        assert!(c1.entity.leased_by.is_none());
    }

    #[tokio::test]
    async fn evaluator_failure_is_recorded_as_other() {
        let now = Utc::now();
        let (store, processor) = setup(Err(RevocationError("status list unreachable".into())), now);
        let created = now - Duration::days(2);
        store
            .save(&revocable("c1", created, None, created))
            .await
            .unwrap();

        assert_eq!(processor.process().await, 1);
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.status(), Some(VcStatus::Other));
        assert_eq!(
            c1.entity.error_detail.as_deref(),
            Some("revocation check failed: status list unreachable")
        );
    }

    #[tokio::test]
    async fn expired_credentials_are_detected() {
        let now = Utc::now();
        let (store, processor) = setup(Ok(None), now);
        let created = now - Duration::days(30);
        store
            .save(&revocable("c1", created, Some(now - Duration::minutes(10)), created))
            .await
            .unwrap();

        assert_eq!(processor.process().await, 1);
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.status(), Some(VcStatus::Expired));
    }

    #[tokio::test]
    async fn expired_credentials_still_pick_up_revocation() {
        let now = Utc::now();
        let (store, processor) = setup(Ok(Some(REVOCATION.into())), now);
        let created = now - Duration::days(30);
        let mut c1 = revocable("c1", created, Some(now - Duration::days(1)), created);
        c1.set_status(VcStatus::Expired, now - Duration::hours(2));
        store.save(&c1).await.unwrap();

        assert_eq!(processor.process_batch().await.unwrap(), BatchReport { claimed: 1, progressed: 1 });
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.status(), Some(VcStatus::Revoked));
    }

    #[tokio::test]
    async fn credentials_near_expiry_are_reissued_once() {
        let now = Utc::now();
        let (store, watchdog) = watchdog(Ok(None), now);
        let reissuer = Arc::new(RecordingReissuer::default());
        let processor = watchdog
            .with_recheck_interval(Duration::zero())
            .with_reissuance(reissuer.clone(), Duration::days(7))
            .into_processor();
        let created = now - Duration::days(300);
        store
            .save(
                &revocable("c1", created, Some(now + Duration::days(3)), created)
                    .with_metadata(CREDENTIAL_OBJECT_ID, json!("obj-1")),
            )
            .await
            .unwrap();
        store
            .save(&revocable("c2", created, Some(now + Duration::days(30)), created))
            .await
            .unwrap();

        assert_eq!(processor.process_batch().await.unwrap(), BatchReport { claimed: 2, progressed: 1 });
        let requests = reissuer.requests.lock().clone();
        assert_eq!(
            requests,
            [ReissuanceRequest {
                participant_context_id: "p1".into(),
                issuer_did: "did:web:issuer".into(),
                credential_object_id: "obj-1".into(),
                credential_type: "MembershipCredential".into(),
                format: crate::credential::CredentialFormat::Vc1Jwt,
            }]
        );
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.status(), Some(VcStatus::Issued));
        assert_eq!(c1.issuance_state, VcIssuanceState::ReissueRequested);
        assert_eq!(c1.metadata[REISSUANCE_REQUEST_ID], json!("reissue-1"));

        assert_eq!(processor.process_batch().await.unwrap(), BatchReport { claimed: 2, progressed: 0 });
        assert_eq!(reissuer.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn reissuance_needs_a_credential_object_id() {
        let now = Utc::now();
        let (store, watchdog) = watchdog(Ok(None), now);
        let reissuer = Arc::new(RecordingReissuer::default());
        let processor = watchdog
            .with_reissuance(reissuer.clone(), Duration::days(7))
            .into_processor();
        let created = now - Duration::days(300);
        store
            .save(&revocable("c1", created, Some(now + Duration::days(1)), created))
            .await
            .unwrap();

        assert_eq!(processor.process().await, 0);
        assert!(reissuer.requests.lock().is_empty());
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.issuance_state, VcIssuanceState::Issued);
    }

    #[tokio::test]
    async fn failed_reissuance_is_retried_on_the_next_check() {
        let now = Utc::now();
        let (store, watchdog) = watchdog(Ok(None), now);
        let reissuer = Arc::new(RecordingReissuer {
            fail: true,
            ..Default::default()
        });
        let processor = watchdog.with_reissuance(reissuer, Duration::days(7)).into_processor();
        let created = now - Duration::days(300);
        store
            .save(
                &revocable("c1", created, Some(now + Duration::days(1)), created)
                    .with_metadata(CREDENTIAL_OBJECT_ID, json!("obj-1")),
            )
            .await
            .unwrap();

        assert_eq!(processor.process().await, 0);
        let c1 = store.find_by_id("c1").await.unwrap().unwrap();
        assert_eq!(c1.issuance_state, VcIssuanceState::Issued);
        assert!(!c1.metadata.contains_key(REISSUANCE_REQUEST_ID));
    }

    #[tokio::test]
    async fn revoked_credentials_are_not_reissued() {
        let now = Utc::now();
        let (store, watchdog) = watchdog(Ok(Some(REVOCATION.into())), now);
        let reissuer = Arc::new(RecordingReissuer::default());
        let processor = watchdog
            .with_reissuance(reissuer.clone(), Duration::days(7))
            .into_processor();
        let created = now - Duration::days(300);
        store
            .save(
                &revocable("c1", created, Some(now + Duration::days(1)), created)
                    .with_metadata(CREDENTIAL_OBJECT_ID, json!("obj-1")),
            )
            .await
            .unwrap();

        assert_eq!(processor.process().await, 1);
        assert!(reissuer.requests.lock().is_empty());
    }
}

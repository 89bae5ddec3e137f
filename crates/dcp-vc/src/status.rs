//! # Credential Status Evaluator
//!
//! Derives a credential's [`VcStatus`] with fixed precedence, ignoring the
//! previously stored status:
//!
//! 1. `now < issuanceDate` → `NOT_YET_VALID`. The registry is not consulted.
//! 2. `expirationDate` set and `now > expirationDate` → `EXPIRED`, unless the
//!    registry reports `revocation`, which yields `REVOKED`.
//! 3. Otherwise the registry decides: no signal → `ISSUED`, `revocation` →
//!    `REVOKED`, `suspension` → `SUSPENDED`, anything else → `ISSUED`.
//!
//! Signals compare case-insensitively. A registry failure is an error, not
//! a status; callers record it as `OTHER`.

use std::sync::Arc;

use dcp_core::{SharedClock, SystemClock};
use thiserror::Error;

use crate::credential::VerifiableCredential;
use crate::resource::{VcStatus, VerifiableCredentialResource};
use crate::revocation::{RevocationServiceRegistry, REVOCATION, SUSPENSION};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// The revocation registry could not be queried.
    #[error("revocation check failed: {0}")]
    Revocation(String),
}

/// Computes [`VcStatus`] from validity bounds and the revocation registry.
#[derive(Clone)]
pub struct StatusEvaluator {
    registry: Arc<dyn RevocationServiceRegistry>,
    clock: SharedClock,
}

impl StatusEvaluator {
    pub fn new(registry: Arc<dyn RevocationServiceRegistry>) -> Self {
        Self {
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Status of a stored credential.
    pub async fn status(&self, resource: &VerifiableCredentialResource) -> Result<VcStatus, StatusError> {
        self.credential_status(&resource.verifiable_credential.credential)
            .await
    }

    /// Status of a bare credential.
    pub async fn credential_status(
        &self,
        credential: &VerifiableCredential,
    ) -> Result<VcStatus, StatusError> {
        let now = self.clock.now();

        if now < credential.issuance_date {
            return Ok(VcStatus::NotYetValid);
        }

        if credential.expiration_date.is_some_and(|exp| now > exp) {
            let signal = self.signal(credential).await?;
            return Ok(match signal {
                Some(s) if s.eq_ignore_ascii_case(REVOCATION) => VcStatus::Revoked,
                _ => VcStatus::Expired,
            });
        }

        Ok(match self.signal(credential).await? {
            None => VcStatus::Issued,
            Some(s) if s.eq_ignore_ascii_case(REVOCATION) => VcStatus::Revoked,
            Some(s) if s.eq_ignore_ascii_case(SUSPENSION) => VcStatus::Suspended,
            Some(other) => {
                tracing::debug!(signal = %other, "ignoring unknown revocation signal");
                VcStatus::Issued
            }
        })
    }

    async fn signal(&self, credential: &VerifiableCredential) -> Result<Option<String>, StatusError> {
        self.registry
            .revocation_status(credential)
            .await
            .map_err(|e| StatusError::Revocation(e.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::VerifiableCredential;
    use crate::resource::tests::{credential, resource};
    use crate::revocation::RevocationError;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use dcp_core::FixedClock;
    use parking_lot::Mutex;

    struct ScriptedRegistry {
        answer: Result<Option<String>, RevocationError>,
        calls: Mutex<usize>,
    }

    impl ScriptedRegistry {
        fn new(answer: Result<Option<String>, RevocationError>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl RevocationServiceRegistry for ScriptedRegistry {
        async fn revocation_status(
            &self,
            _credential: &VerifiableCredential,
        ) -> Result<Option<String>, RevocationError> {
            *self.calls.lock() += 1;
            self.answer.clone()
        }
    }

    fn evaluator(registry: Arc<ScriptedRegistry>) -> (StatusEvaluator, chrono::DateTime<Utc>) {
        let now = Utc::now();
        let eval = StatusEvaluator::new(registry).with_clock(Arc::new(FixedClock::new(now)));
        (eval, now)
    }

    #[tokio::test]
    async fn expired_and_revoked_is_revoked() {
        let registry = ScriptedRegistry::new(Ok(Some("revocation".into())));
        let (eval, now) = evaluator(registry);
        let vc = credential(
            &["VerifiableCredential"],
            now - Duration::days(30),
            Some(now - Duration::minutes(10)),
        );
        assert_eq!(eval.credential_status(&vc).await, Ok(VcStatus::Revoked));
    }

    #[tokio::test]
    async fn expired_with_suspension_is_expired() {
        let (eval, now) = evaluator(ScriptedRegistry::new(Ok(Some("suspension".into()))));
        let vc = credential(
            &["VerifiableCredential"],
            now - Duration::days(30),
            Some(now - Duration::minutes(10)),
        );
        assert_eq!(eval.credential_status(&vc).await, Ok(VcStatus::Expired));
    }

    #[tokio::test]
    async fn not_yet_valid_skips_registry() {
        let registry = ScriptedRegistry::new(Ok(None));
        let (eval, now) = evaluator(registry.clone());
        let vc = credential(&["VerifiableCredential"], now + Duration::days(1), None);
        assert_eq!(eval.credential_status(&vc).await, Ok(VcStatus::NotYetValid));
        assert_eq!(*registry.calls.lock(), 0);
    }

    #[tokio::test]
    async fn not_yet_valid_even_with_revocation_signal() {
        let (eval, now) = evaluator(ScriptedRegistry::new(Ok(Some("revocation".into()))));
        let vc = credential(&["VerifiableCredential"], now + Duration::hours(1), None);
        assert_eq!(eval.credential_status(&vc).await, Ok(VcStatus::NotYetValid));
    }

    #[tokio::test]
    async fn valid_with_suspension_is_suspended() {
        let (eval, now) = evaluator(ScriptedRegistry::new(Ok(Some("SUSPENSION".into()))));
        let vc = credential(&["VerifiableCredential"], now - Duration::hours(1), None);
        assert_eq!(eval.credential_status(&vc).await, Ok(VcStatus::Suspended));
    }

    #[tokio::test]
    async fn registry_signals_within_validity() {
        let cases = [
            (None, VcStatus::Issued),
            (Some("revocation"), VcStatus::Revoked),
            (Some("Revocation"), VcStatus::Revoked),
            (Some("refresh"), VcStatus::Issued),
        ];
        for (signal, expected) in cases {
            let (eval, now) = evaluator(ScriptedRegistry::new(Ok(signal.map(String::from))));
            let vc = credential(
                &["VerifiableCredential"],
                now - Duration::hours(1),
                Some(now + Duration::days(1)),
            );
            assert_eq!(eval.credential_status(&vc).await, Ok(expected), "signal {signal:?}");
        }
    }

    #[tokio::test]
    async fn previously_stored_status_is_ignored() {
        let (eval, now) = evaluator(ScriptedRegistry::new(Ok(None)));
        let mut r = resource(
            "c1",
            "p1",
            credential(&["VerifiableCredential"], now - Duration::hours(1), None),
        );
        r.set_status(VcStatus::Suspended, now);
        assert_eq!(eval.status(&r).await, Ok(VcStatus::Issued));
    }

    #[tokio::test]
    async fn registry_failure_is_an_error() {
        let (eval, now) = evaluator(ScriptedRegistry::new(Err(RevocationError("timeout".into()))));
        let vc = credential(&["VerifiableCredential"], now - Duration::hours(1), None);
        assert_eq!(
            eval.credential_status(&vc).await,
            Err(StatusError::Revocation("timeout".into()))
        );
    }
}

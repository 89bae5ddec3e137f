//! # In-Memory Leasable Store
//!
//! A [`LeasableStore`] over a `parking_lot::RwLock<HashMap>`. Every claim
//! runs under a single write lock, which makes `next_not_leased` atomic
//! with respect to every other handle sharing the map.
//!
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dcp_core::{QuerySpec, SharedClock, Stateful, StoreError, SystemClock};
use parking_lot::RwLock;

use crate::store::{LeasableStore, StateFilter, DEFAULT_LEASE_DURATION_SECS};

/// Thread-safe in-memory store handle bound to one owner.
#[derive(Debug)]
pub struct InMemoryStore<T: Stateful> {
    data: Arc<RwLock<HashMap<String, T>>>,
    owner: String,
    lease_duration: Duration,
    clock: SharedClock,
}

impl<T: Stateful> Clone for InMemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            owner: self.owner.clone(),
            lease_duration: self.lease_duration,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: Stateful> InMemoryStore<T> {
    /// Create an empty store owned by `owner`, on the system clock.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            owner: owner.into(),
            lease_duration: Duration::seconds(DEFAULT_LEASE_DURATION_SECS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// Another handle over the same data, leasing as `owner`.
    pub fn handle(&self, owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..self.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_lease(&self, stored: &T) -> Result<(), StoreError> {
        let now = self.clock.now();
        let entity = stored.entity();
        if entity.is_leased_by_other(&self.owner, now) {
            return Err(StoreError::LeaseViolation {
                id: entity.id.clone(),
                leased_by: entity.leased_by.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn lease(&self, entity: &mut T) {
        let expiry = self.clock.now() + self.lease_duration;
        let e = entity.entity_mut();
        e.leased_by = Some(self.owner.clone());
        e.lease_expiry = Some(expiry);
    }
}

#[async_trait]
impl<T: Stateful> LeasableStore<T> for InMemoryStore<T> {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn save(&self, entity: &T) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        if let Some(stored) = guard.get(entity.id()) {
            self.check_lease(stored)?;
        }
        let mut copy = entity.clone();
        copy.entity_mut().clear_lease();
        guard.insert(copy.id().to_string(), copy);
        Ok(())
    }

    async fn create(&self, entity: &T) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        if guard.contains_key(entity.id()) {
            return Err(StoreError::AlreadyExists {
                id: entity.id().to_string(),
            });
        }
        let mut copy = entity.clone();
        copy.entity_mut().clear_lease();
        guard.insert(copy.id().to_string(), copy);
        Ok(())
    }

    async fn update(&self, entity: &T) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        if let Some(stored) = guard.get(entity.id()) {
            self.check_lease(stored)?;
        }
        let mut copy = entity.clone();
        self.lease(&mut copy);
        guard.insert(copy.id().to_string(), copy);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.data.read().get(id).cloned())
    }

    async fn find_by_id_and_lease(&self, id: &str) -> Result<T, StoreError> {
        let mut guard = self.data.write();
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        self.check_lease(stored)?;
        self.lease(stored);
        Ok(stored.clone())
    }

    async fn next_not_leased(
        &self,
        limit: usize,
        filter: &StateFilter,
    ) -> Result<Vec<T>, StoreError> {
        let now = self.clock.now();
        let mut guard = self.data.write();

        let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, String)> = guard
            .values()
            .map(Stateful::entity)
            .filter(|e| filter.matches(e.state) && !e.is_leased_at(now))
            .map(|e| (e.state_timestamp, e.id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(entity) = guard.get_mut(&id) {
                self.lease(entity);
                claimed.push(entity.clone());
            }
        }
        Ok(claimed)
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>, StoreError> {
        let mut all: Vec<T> = self.data.read().values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        let items = all
            .into_iter()
            .map(|t| Ok((serde_json::to_value(&t)?, t)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(spec.apply(items))
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        let stored = guard
            .get(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        self.check_lease(stored)?;
        guard.remove(id);
        Ok(())
    }

    async fn break_lease(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        self.check_lease(stored)?;
        stored.entity_mut().clear_lease();
        Ok(())
    }
}

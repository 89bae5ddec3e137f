//! # Leasable Entity Store
//!
//! Generic persistence contract over [`Stateful`] entities.
//!
//! Every store handle is bound to an owner id (the processing instance) and
//! a lease duration. Handles created for different owners over the same
//! backing storage observe each other's leases.
//!
//! ## Lease rules
//!
//! - An entity is claimable when it is unleased or its lease has expired
//!   (`lease_expiry <= now`).
//! - A write (`save`, `update`, `delete_by_id`, `break_lease`) by a handle
//!   whose owner is not the current lease holder fails with
//!   [`StoreError::LeaseViolation`] while the lease is in force.
//! - `save` releases the lease; `update` keeps it.

use std::sync::Arc;

use async_trait::async_trait;
use dcp_core::{QuerySpec, Stateful, StoreError};

/// Default lease duration for store handles.
pub const DEFAULT_LEASE_DURATION_SECS: i64 = 60;

/// Set of state codes a claim or query is restricted to.
///
/// An empty filter matches every state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateFilter {
    states: Vec<i32>,
}

impl StateFilter {
    pub fn has_state(state: i32) -> Self {
        Self {
            states: vec![state],
        }
    }

    pub fn any_of(states: impl IntoIterator<Item = i32>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    pub fn matches(&self, state: i32) -> bool {
        self.states.is_empty() || self.states.contains(&state)
    }

    pub fn states(&self) -> &[i32] {
        &self.states
    }
}

/// Claim-and-lease persistence for one entity type.
#[async_trait]
pub trait LeasableStore<T: Stateful>: Send + Sync {
    /// Owner id written into leases taken through this handle.
    fn owner(&self) -> &str;

    /// Upsert by id and release the lease.
    async fn save(&self, entity: &T) -> Result<(), StoreError>;

    /// Insert a new entity; [`StoreError::AlreadyExists`] if the id is taken.
    async fn create(&self, entity: &T) -> Result<(), StoreError>;

    /// Persist an intermediate state while keeping (or taking) this owner's
    /// lease, refreshed to a full lease duration.
    async fn update(&self, entity: &T) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// Load one entity and lease it to this owner.
    async fn find_by_id_and_lease(&self, id: &str) -> Result<T, StoreError>;

    /// Atomically lease up to `limit` claimable entities matching `filter`,
    /// oldest `state_timestamp` first, ties broken by id.
    async fn next_not_leased(&self, limit: usize, filter: &StateFilter)
        -> Result<Vec<T>, StoreError>;

    /// Read-only filter, sort and page.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>, StoreError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError>;

    /// Release this owner's lease without changing the entity.
    async fn break_lease(&self, id: &str) -> Result<(), StoreError>;
}

pub type SharedStore<T> = Arc<dyn LeasableStore<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_filter_matching() {
        assert!(StateFilter::default().matches(42));
        assert!(StateFilter::has_state(100).matches(100));
        assert!(!StateFilter::has_state(100).matches(200));
        let f = StateFilter::any_of([100, 200]);
        assert!(f.matches(200));
        assert_eq!(f.states(), &[100, 200]);
    }
}

//! # Stateful Entities
//!
//! [`StatefulEntity`] is the base record embedded (flattened) in every
//! workflow entity: holder credential requests, issuance processes,
//! credential offers and stored credentials.
//!
//! States are integer codes so that stores can filter on them without
//! knowing the concrete entity type. Each entity defines a state enum
//! implementing [`StateCode`]; [`advance`] is the single place where the
//! transition graph is enforced.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Fields shared by every state-machine driven entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulEntity {
    /// Opaque unique id.
    pub id: String,
    /// Integer code of the current state.
    pub state: i32,
    /// Time of the last transition (or re-entry).
    pub state_timestamp: DateTime<Utc>,
    /// Number of consecutive entries into the current state.
    pub state_count: u32,
    /// Processing instance holding the lease, if any.
    #[serde(default)]
    pub leased_by: Option<String>,
    /// Absolute lease expiry; `None` when unleased.
    #[serde(default)]
    pub lease_expiry: Option<DateTime<Utc>>,
    /// Failure message, set only in an error state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatefulEntity {
    /// A fresh, unleased entity in `state`.
    pub fn new(id: impl Into<String>, state: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state,
            state_timestamp: now,
            state_count: 1,
            leased_by: None,
            lease_expiry: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state` without graph validation.
    ///
    /// Re-entering the current state increments `state_count`; entering a
    /// new state resets it to 1. Both refresh `state_timestamp`.
    pub fn transition_to(&mut self, state: i32, now: DateTime<Utc>) {
        if self.state == state {
            self.state_count = self.state_count.saturating_add(1);
        } else {
            self.state_count = 1;
        }
        self.state = state;
        self.state_timestamp = now;
        self.updated_at = now;
    }

    /// Whether a lease is currently in force.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.leased_by.is_some() && self.lease_expiry.is_some_and(|expiry| expiry > now)
    }

    /// Whether an owner other than `owner` holds a lease in force.
    pub fn is_leased_by_other(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.is_leased_at(now) && self.leased_by.as_deref() != Some(owner)
    }

    pub fn clear_lease(&mut self) {
        self.leased_by = None;
        self.lease_expiry = None;
    }
}

/// An entity type persisted by a leasable store.
pub trait Stateful: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Discriminator used by stores that share one table across entity types.
    const KIND: &'static str;

    fn entity(&self) -> &StatefulEntity;

    fn entity_mut(&mut self) -> &mut StatefulEntity;

    fn id(&self) -> &str {
        &self.entity().id
    }

    fn state(&self) -> i32 {
        self.entity().state
    }

    fn error_detail(&self) -> Option<&str> {
        self.entity().error_detail.as_deref()
    }
}

/// A state enum with stable integer codes and a forward-only graph.
pub trait StateCode: Copy + Eq + std::fmt::Display + Sized {
    fn code(self) -> i32;

    fn from_code(code: i32) -> Option<Self>;

    /// Terminal states are never left.
    fn is_terminal(self) -> bool;

    /// Whether `next` is an edge of the graph from `self`. Same-state
    /// re-entry is expressed here too.
    fn can_transition_to(self, next: Self) -> bool;
}

/// Validate and apply a transition on `entity`.
pub fn advance<S: StateCode>(
    entity: &mut StatefulEntity,
    to: S,
    now: DateTime<Utc>,
) -> Result<(), StateTransitionError> {
    let from = S::from_code(entity.state).ok_or(StateTransitionError::UnknownState(entity.state))?;
    if from.is_terminal() || !from.can_transition_to(to) {
        return Err(StateTransitionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    entity.transition_to(to.code(), now);
    Ok(())
}

//! # Error Hierarchy
//!
//! Structured error types for the DCP stack, built with `thiserror`.
//!
//! Synchronous entry points (request initiation, issuance initiation,
//! credential delivery) return [`ServiceResult`], whose error carries a
//! [`ReasonCode`] and a message. Asynchronous state-machine failures never
//! reach a caller; they are recorded on the entity as its terminal error
//! state with an `errorDetail`.

use std::fmt;

use thiserror::Error;

/// Result type of every synchronous service entry point.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure returned from a synchronous service entry point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed input, a missing endpoint or a missing definition.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Token, signature or authorization failure, including a failed rule.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with the same id already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing store is unavailable or rejected the write.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// DID resolution, token minting or HTTP delivery failed.
    #[error("transient protocol failure: {0}")]
    TransientProtocol(String),
}

impl ServiceError {
    /// The machine-readable reason code for this failure.
    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::BadRequest(_) => ReasonCode::BadRequest,
            Self::Unauthorized(_) => ReasonCode::Unauthorized,
            Self::NotFound(_) => ReasonCode::NotFound,
            Self::Conflict(_) => ReasonCode::Conflict,
            Self::Persistence(_) => ReasonCode::PersistenceFailure,
            Self::TransientProtocol(_) => ReasonCode::TransientProtocolFailure,
        }
    }

    /// The human-readable failure message, without the reason prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Persistence(m)
            | Self::TransientProtocol(m) => m,
        }
    }
}

/// Reason code attached to a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    PersistenceFailure,
    TransientProtocolFailure,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::PersistenceFailure => "PERSISTENCE_FAILURE",
            Self::TransientProtocolFailure => "TRANSIENT_PROTOCOL_FAILURE",
        };
        f.write_str(s)
    }
}

/// Errors raised by a leasable entity store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No entity with this id exists.
    #[error("entity '{id}' not found")]
    NotFound {
        /// The requested entity id.
        id: String,
    },

    /// `create` was called with an id that is already taken.
    #[error("entity '{id}' already exists")]
    AlreadyExists {
        /// The conflicting entity id.
        id: String,
    },

    /// The entity is leased by a different owner whose lease has not expired.
    #[error("entity '{id}' is leased by '{leased_by}'")]
    LeaseViolation {
        /// The entity id.
        id: String,
        /// The owner currently holding the lease.
        leased_by: String,
    },

    /// The storage backend failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The entity could not be converted to or from its stored form.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => ServiceError::Conflict(err.to_string()),
            StoreError::LeaseViolation { .. }
            | StoreError::Persistence(_)
            | StoreError::Serialization(_) => ServiceError::Persistence(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors during state machine transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    /// The attempted transition is not an edge of the entity's state graph.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
    },

    /// The stored state code does not belong to the entity's state enum.
    #[error("unknown state code {0}")]
    UnknownState(i32),
}

impl From<StateTransitionError> for ServiceError {
    fn from(err: StateTransitionError) -> Self {
        ServiceError::BadRequest(err.to_string())
    }
}

/// Validation errors for domain primitive newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// DID does not conform to W3C DID syntax (did:method:identifier).
    #[error("invalid DID format: \"{0}\" (expected did:<method>:<identifier>)")]
    InvalidDid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_reason_codes() {
        assert_eq!(
            ServiceError::BadRequest("x".into()).reason(),
            ReasonCode::BadRequest
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).reason(),
            ReasonCode::Unauthorized
        );
        assert_eq!(
            ServiceError::TransientProtocol("x".into()).reason(),
            ReasonCode::TransientProtocolFailure
        );
        assert_eq!(
            ReasonCode::PersistenceFailure.to_string(),
            "PERSISTENCE_FAILURE"
        );
    }

    #[test]
    fn service_error_message_strips_prefix() {
        let err = ServiceError::Unauthorized("rule failed".into());
        assert_eq!(err.message(), "rule failed");
        assert_eq!(err.to_string(), "unauthorized: rule failed");
    }

    #[test]
    fn store_error_maps_into_service_error() {
        let conflict: ServiceError = StoreError::AlreadyExists { id: "r1".into() }.into();
        assert_eq!(conflict.reason(), ReasonCode::Conflict);

        let missing: ServiceError = StoreError::NotFound { id: "r2".into() }.into();
        assert_eq!(missing.reason(), ReasonCode::NotFound);
        assert!(missing.message().contains("r2"));

        let leased: ServiceError = StoreError::LeaseViolation {
            id: "r3".into(),
            leased_by: "node-b".into(),
        }
        .into();
        assert_eq!(leased.reason(), ReasonCode::PersistenceFailure);
    }

    #[test]
    fn transition_error_display() {
        let err = StateTransitionError::InvalidTransition {
            from: "ISSUED".into(),
            to: "REQUESTING".into(),
        };
        assert_eq!(err.to_string(), "invalid transition from ISSUED to REQUESTING");
    }
}

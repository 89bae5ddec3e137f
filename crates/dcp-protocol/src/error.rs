//! Collaborator failures.
//!
//! `Display` renders the bare failure message. State machines copy it
//! verbatim into an entity's `errorDetail`.

use dcp_core::ServiceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// DID resolution failed or the document is unusable.
    #[error("{0}")]
    Resolution(String),

    /// The Secure Token Service could not mint or verify a token.
    #[error("{0}")]
    Token(String),

    /// Transport failure or a non-success HTTP status.
    #[error("{0}")]
    Http(String),

    /// A message body could not be encoded or decoded.
    #[error("{0}")]
    Codec(String),
}

impl ProtocolError {
    pub fn message(&self) -> &str {
        match self {
            Self::Resolution(m) | Self::Token(m) | Self::Http(m) | Self::Codec(m) => m,
        }
    }
}

impl From<ProtocolError> for ServiceError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Codec(m) => ServiceError::BadRequest(m),
            other => ServiceError::TransientProtocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Codec(err.to_string())
    }
}

//! # dcp-protocol — Protocol Collaborators
//!
//! Contracts for the external collaborators the state machines call, their
//! production implementations, and the DCP message types exchanged between
//! holder and issuer.
//!
//! | Collaborator | Trait | Implementation |
//! |---|---|---|
//! | DID resolution | [`DidResolver`] | [`DidResolverRegistry`], [`WebDidResolver`] |
//! | HTTP transport | [`HttpClient`] | [`ReqwestHttpClient`] |
//! | Token minting | [`SecureTokenService`] | [`RemoteSecureTokenService`] |
//! | Token verification | [`TokenVerifier`] | supplied by the embedding service |
//!
//! All traits are object-safe and `Send + Sync` so they can be shared as
//! `Arc<dyn ...>` across processor tasks. None of them retries on failure.
//!
//! With the `testing` feature, [`testing`] provides recording fakes.

pub mod did;
pub mod error;
pub mod http;
pub mod messages;
pub mod token;
pub mod web;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use did::{
    DidDocument, DidResolver, DidResolverRegistry, Service, VerificationMethod,
    CREDENTIAL_SERVICE_TYPE, ISSUER_SERVICE_TYPES,
};
pub use error::ProtocolError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use messages::{
    CredentialContainer, CredentialMessage, CredentialObject, CredentialOfferMessage,
    CredentialRequestMessage, CredentialRequestSpecifier, CredentialRequestStatus,
    CredentialStatusMessage,
};
pub use token::{
    RemoteSecureTokenService, RemoteStsConfig, SecureTokenService, TokenClaims,
    TokenRepresentation, TokenVerifier, DEFAULT_TOKEN_VALIDITY_SECS,
};
pub use web::WebDidResolver;

//! # dcp-vc — Verifiable Credentials
//!
//! The credential model shared by holder and issuer, the stored
//! [`VerifiableCredentialResource`], and the Credential Status Evaluator.
//!
//! ## Status derivation
//!
//! A stored credential's [`VcStatus`] is derived, never trusted: the
//! [`StatusEvaluator`] recomputes it from the credential's validity window
//! and the revocation registry with a fixed precedence, regardless of the
//! previously stored value. See `status.rs`. The [`CredentialWatchdog`]
//! applies it periodically to every stored credential and re-requests
//! credentials close to expiry through a [`CredentialReissuer`].
//!
//! ## Status lists
//!
//! `status_list.rs` holds the W3C Bitstring Status List codec shared by
//! the issuer, which maintains the lists, and the
//! [`StatusListRevocationService`], which reads them.

pub mod credential;
pub mod parser;
pub mod reissue;
pub mod resource;
pub mod revocation;
pub mod status;
pub mod status_list;
pub mod watchdog;

pub use credential::{
    CredentialFormat, CredentialStatusEntry, VerifiableCredential, VerifiableCredentialContainer,
};
pub use parser::{CredentialParser, JsonCredentialParser, ParseError};
pub use resource::{
    credentials_by_holder, credentials_by_participant, credentials_by_type, VcIssuanceState,
    VcStatus, VerifiableCredentialResource,
};
pub use revocation::{
    RevocationError, RevocationRegistry, RevocationService, RevocationServiceRegistry,
    REVOCATION, SUSPENSION,
};
pub use reissue::{CredentialReissuer, ReissuanceRequest, CREDENTIAL_OBJECT_ID, REISSUANCE_REQUEST_ID};
pub use status::{StatusError, StatusEvaluator};
pub use status_list::{
    BitstringStatusList, StatusListEntry, StatusListError, StatusListRevocationService,
    BITSTRING_STATUS_LIST, BITSTRING_STATUS_LIST_CREDENTIAL, BITSTRING_STATUS_LIST_ENTRY,
    DEFAULT_BITSTRING_SIZE,
};
pub use watchdog::{
    CredentialWatchdog, DEFAULT_RECHECK_INTERVAL_SECS, DEFAULT_REISSUANCE_GRACE_PERIOD_SECS,
};

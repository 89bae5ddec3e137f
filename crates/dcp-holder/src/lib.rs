//! # dcp-holder — Holder Side
//!
//! Everything a credential holder runs:
//!
//! - [`CredentialRequestManager`]: creates [`HolderCredentialRequest`]s and
//!   drives them through `CREATED → REQUESTING → REQUESTED → ISSUED`.
//! - [`CredentialWriter`]: stores credentials an issuer delivers for an
//!   earlier request.
//! - [`CredentialOfferService`]: stores unsolicited offers and turns them
//!   into credential requests.
//!
//! The request manager is also the watchdog's [`dcp_vc::CredentialReissuer`]:
//! a credential close to expiry is requested again under its original
//! credential object id.
//!
//! All state machines run on the `dcp-state` engine; their failures are
//! recorded on the entity, never returned to a caller.

pub mod manager;
pub mod offer;
pub mod request;
pub mod writer;

pub use manager::{CredentialRequestManager, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use offer::{CredentialOffer, CredentialOfferService, CredentialOfferState, ProfileRegistry};
pub use request::{HolderCredentialRequest, HolderRequestState, RequestedCredential};
pub use dcp_vc::CREDENTIAL_OBJECT_ID;
pub use writer::CredentialWriter;

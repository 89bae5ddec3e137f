//! DCP messages exchanged between holder and issuer.
//!
//! Plain camelCase JSON. The JSON-LD envelope (`@context`) is not modelled.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One requested credential: a type and the format it should be issued in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestSpecifier {
    pub credential_type: String,
    pub format: String,
}

impl CredentialRequestSpecifier {
    pub fn new(credential_type: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            credential_type: credential_type.into(),
            format: format.into(),
        }
    }
}

/// Holder → issuer: request issuance of one or more credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestMessage {
    pub holder_pid: String,
    pub credentials: Vec<CredentialRequestSpecifier>,
}

/// Issuer-side status of a credential request as reported to the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialRequestStatus {
    Received,
    Rejected,
    Issued,
}

impl fmt::Display for CredentialRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Rejected => "REJECTED",
            Self::Issued => "ISSUED",
        };
        f.write_str(s)
    }
}

impl FromStr for CredentialRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(Self::Received),
            "REJECTED" => Ok(Self::Rejected),
            "ISSUED" => Ok(Self::Issued),
            other => Err(other.to_string()),
        }
    }
}

/// Issuer → holder: answer to a credential request status query.
///
/// `status` stays a string so that an unknown answer can be reported
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatusMessage {
    pub holder_pid: String,
    pub issuer_pid: String,
    pub status: String,
}

impl CredentialStatusMessage {
    pub fn new(
        holder_pid: impl Into<String>,
        issuer_pid: impl Into<String>,
        status: CredentialRequestStatus,
    ) -> Self {
        Self {
            holder_pid: holder_pid.into(),
            issuer_pid: issuer_pid.into(),
            status: status.to_string(),
        }
    }
}

/// One delivered credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialContainer {
    pub credential_type: String,
    pub format: String,
    /// The encoded credential: a JWT string or an embedded JSON document.
    pub payload: Value,
}

/// Issuer → holder: deliver issued credentials to the holder's storage API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMessage {
    pub issuer_pid: String,
    pub holder_pid: String,
    pub credentials: Vec<CredentialContainer>,
    pub status: String,
}

/// A credential an issuer offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub credential_type: String,
    /// Profile naming the format family, e.g. `vc11-sl2021/jwt`.
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binding_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuance_policy: Option<Value>,
}

/// Issuer → holder: unsolicited credential offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOfferMessage {
    pub issuer: String,
    pub credentials: Vec<CredentialObject>,
}

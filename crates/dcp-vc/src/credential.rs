//! # Verifiable Credential structure
//!
//! The parts of a W3C Verifiable Credential the stack reasons about:
//! types, issuer, validity window and `credentialStatus` entries. The
//! subject stays an opaque JSON value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Encoding a credential is issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialFormat {
    #[serde(rename = "VC1_0_JWT")]
    Vc1Jwt,
    #[serde(rename = "VC1_0_LD")]
    Vc1Ld,
    #[serde(rename = "VC2_0_JOSE")]
    Vc2Jose,
    #[serde(rename = "VC2_0_SD_JWT")]
    Vc2SdJwt,
    #[serde(rename = "VC2_0_COSE")]
    Vc2Cose,
}

impl CredentialFormat {
    pub const ALL: [CredentialFormat; 5] = [
        Self::Vc1Jwt,
        Self::Vc1Ld,
        Self::Vc2Jose,
        Self::Vc2SdJwt,
        Self::Vc2Cose,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vc1Jwt => "VC1_0_JWT",
            Self::Vc1Ld => "VC1_0_LD",
            Self::Vc2Jose => "VC2_0_JOSE",
            Self::Vc2SdJwt => "VC2_0_SD_JWT",
            Self::Vc2Cose => "VC2_0_COSE",
        }
    }
}

impl fmt::Display for CredentialFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialFormat {
    type Err = String;

    /// Parse a format name, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown credential format '{s}'"))
    }
}

/// One `credentialStatus` entry, e.g. a status-list reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialStatusEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub status_type: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CredentialStatusEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CredentialStatusEntry),
        Many(Vec<CredentialStatusEntry>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    })
}

/// A W3C Verifiable Credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub issuer: String,
    #[serde(alias = "validFrom")]
    pub issuance_date: DateTime<Utc>,
    #[serde(default, alias = "validUntil", skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    pub credential_subject: Value,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub credential_status: Vec<CredentialStatusEntry>,
}

impl VerifiableCredential {
    /// The most specific type, i.e. the first that is not the generic
    /// `VerifiableCredential`.
    pub fn primary_type(&self) -> Option<&str> {
        self.types
            .iter()
            .map(String::as_str)
            .find(|t| !t.eq_ignore_ascii_case("VerifiableCredential"))
    }

    pub fn has_type(&self, credential_type: &str) -> bool {
        self.types.iter().any(|t| t == credential_type)
    }
}

/// A credential together with its encoded form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredentialContainer {
    /// The credential exactly as received (JWT string or JSON text).
    pub raw_vc: String,
    pub format: CredentialFormat,
    pub credential: VerifiableCredential,
}

//! # Bitstring Status List
//!
//! The W3C Bitstring Status List: one bit per issued credential, gzip
//! compressed and published as the multibase base64url `encodedList` of a
//! status list credential. Index 0 is the left-most (most significant) bit
//! of the first byte.
//!
//! [`StatusListRevocationService`] is the verifier side. It fetches the
//! status list credential a `BitstringStatusListEntry` points at and
//! reports the entry's `statusPurpose` when its bit is set.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use bitvec::prelude::{BitVec, Msb0};
use dcp_core::ServiceError;
use dcp_protocol::{HttpClient, HttpRequest};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use thiserror::Error;

use crate::credential::{CredentialStatusEntry, VerifiableCredential};
use crate::revocation::{RevocationError, RevocationService};

pub const BITSTRING_STATUS_LIST_ENTRY: &str = "BitstringStatusListEntry";
pub const BITSTRING_STATUS_LIST: &str = "BitstringStatusList";
pub const BITSTRING_STATUS_LIST_CREDENTIAL: &str = "BitstringStatusListCredential";

pub const STATUS_PURPOSE: &str = "statusPurpose";
pub const STATUS_LIST_INDEX: &str = "statusListIndex";
pub const STATUS_LIST_CREDENTIAL: &str = "statusListCredential";
pub const ENCODED_LIST: &str = "encodedList";

/// Entries per list: the 16KB minimum bitstring.
pub const DEFAULT_BITSTRING_SIZE: usize = 16 * 1024 * 8;

const MULTIBASE_BASE64URL: char = 'u';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusListError {
    #[error("status index {index} out of range for a list of {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot encode status list: {0}")]
    Encoding(String),

    #[error("cannot decode status list: {0}")]
    Decoding(String),

    #[error("invalid status entry: {0}")]
    InvalidEntry(String),
}

impl From<StatusListError> for ServiceError {
    fn from(err: StatusListError) -> Self {
        match err {
            StatusListError::IndexOutOfRange { .. } | StatusListError::InvalidEntry(_) => {
                ServiceError::BadRequest(err.to_string())
            }
            StatusListError::Encoding(_) | StatusListError::Decoding(_) => {
                ServiceError::Persistence(err.to_string())
            }
        }
    }
}

// ---- Bitstring ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitstringStatusList {
    bits: BitVec<u8, Msb0>,
}

impl BitstringStatusList {
    /// An all-clear list of at least `size` entries, rounded up to whole bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bits: BitVec::from_vec(vec![0u8; size.div_ceil(8)]),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<bool, StatusListError> {
        self.bits
            .get(index)
            .map(|bit| *bit)
            .ok_or(StatusListError::IndexOutOfRange {
                index,
                len: self.len(),
            })
    }

    pub fn set(&mut self, index: usize, value: bool) -> Result<(), StatusListError> {
        let len = self.len();
        if index >= len {
            return Err(StatusListError::IndexOutOfRange { index, len });
        }
        self.bits.set(index, value);
        Ok(())
    }

    /// Gzip, base64url without padding, multibase prefix `u`.
    pub fn encode(&self) -> Result<String, StatusListError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(self.bits.as_raw_slice())
            .map_err(|e| StatusListError::Encoding(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StatusListError::Encoding(e.to_string()))?;
        Ok(format!(
            "{MULTIBASE_BASE64URL}{}",
            Base64UrlUnpadded::encode_string(&compressed)
        ))
    }

    /// Inverse of [`encode`](Self::encode). The multibase prefix and
    /// padding are optional.
    pub fn decode(encoded: &str) -> Result<Self, StatusListError> {
        let encoded = encoded
            .strip_prefix(MULTIBASE_BASE64URL)
            .unwrap_or(encoded)
            .trim_end_matches('=');
        let compressed = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|e| StatusListError::Decoding(e.to_string()))?;
        let mut bytes = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut bytes)
            .map_err(|e| StatusListError::Decoding(e.to_string()))?;
        Ok(Self {
            bits: BitVec::from_vec(bytes),
        })
    }
}

// ---- Status entries ----

/// The fields of a `BitstringStatusListEntry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusListEntry {
    pub purpose: String,
    pub index: usize,
    pub list_credential: String,
}

impl StatusListEntry {
    pub fn parse(entry: &CredentialStatusEntry) -> Result<Self, StatusListError> {
        let text = |key: &str| {
            entry
                .properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| StatusListError::InvalidEntry(format!("missing '{key}'")))
        };
        let index = match entry.properties.get(STATUS_LIST_INDEX) {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            _ => None,
        }
        .ok_or_else(|| StatusListError::InvalidEntry(format!("missing or invalid '{STATUS_LIST_INDEX}'")))?;
        Ok(Self {
            purpose: text(STATUS_PURPOSE)?,
            index,
            list_credential: text(STATUS_LIST_CREDENTIAL)?,
        })
    }

    /// The credential status entry pointing at this list position.
    pub fn to_credential_status(&self) -> CredentialStatusEntry {
        let mut properties = serde_json::Map::new();
        properties.insert(STATUS_PURPOSE.into(), Value::String(self.purpose.clone()));
        properties.insert(STATUS_LIST_INDEX.into(), Value::String(self.index.to_string()));
        properties.insert(
            STATUS_LIST_CREDENTIAL.into(),
            Value::String(self.list_credential.clone()),
        );
        CredentialStatusEntry {
            id: Some(format!("{}#{}", self.list_credential, self.index)),
            status_type: BITSTRING_STATUS_LIST_ENTRY.into(),
            properties,
        }
    }
}

/// The subject of a status list credential: the first subject object
/// carrying an `encodedList`.
pub fn list_subject(credential: &VerifiableCredential) -> Option<&serde_json::Map<String, Value>> {
    match &credential.credential_subject {
        Value::Object(subject) => Some(subject),
        Value::Array(subjects) => subjects
            .iter()
            .filter_map(Value::as_object)
            .find(|s| s.contains_key(ENCODED_LIST)),
        _ => None,
    }
}

/// The decoded bitstring of a status list credential.
pub fn decode_list(credential: &VerifiableCredential) -> Result<BitstringStatusList, StatusListError> {
    let encoded = list_subject(credential)
        .and_then(|s| s.get(ENCODED_LIST))
        .and_then(Value::as_str)
        .ok_or_else(|| StatusListError::Decoding(format!("credential has no '{ENCODED_LIST}'")))?;
    BitstringStatusList::decode(encoded)
}

/// A status list credential as served: JSON, or a JWT carrying it in `vc`.
pub fn parse_list_credential(body: &str) -> Result<VerifiableCredential, StatusListError> {
    let body = body.trim();
    let json: Value = if body.starts_with('{') {
        serde_json::from_str(body).map_err(|e| StatusListError::Decoding(e.to_string()))?
    } else {
        let payload = body
            .split('.')
            .nth(1)
            .ok_or_else(|| StatusListError::Decoding("neither JSON nor a JWT".into()))?;
        let payload = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
            .map_err(|e| StatusListError::Decoding(e.to_string()))?;
        let mut claims: Value =
            serde_json::from_slice(&payload).map_err(|e| StatusListError::Decoding(e.to_string()))?;
        match claims.get_mut("vc") {
            Some(vc) => vc.take(),
            None => claims,
        }
    };
    serde_json::from_value(json).map_err(|e| StatusListError::Decoding(e.to_string()))
}

// ---- Verifier ----

/// [`RevocationService`] for `BitstringStatusListEntry` status entries.
pub struct StatusListRevocationService {
    http: Arc<dyn HttpClient>,
}

impl StatusListRevocationService {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RevocationService for StatusListRevocationService {
    async fn check(&self, entry: &CredentialStatusEntry) -> Result<Option<String>, RevocationError> {
        let entry = StatusListEntry::parse(entry).map_err(|e| RevocationError(e.to_string()))?;
        let response = self
            .http
            .execute(HttpRequest::get(&entry.list_credential))
            .await
            .map_err(|e| RevocationError(format!("status list {}: {e}", entry.list_credential)))?;
        let set = parse_list_credential(&response.body)
            .and_then(|credential| decode_list(&credential))
            .and_then(|list| list.get(entry.index))
            .map_err(|e| RevocationError(format!("status list {}: {e}", entry.list_credential)))?;
        tracing::debug!(
            list = %entry.list_credential,
            index = entry.index,
            purpose = %entry.purpose,
            set,
            "checked status list"
        );
        Ok(set.then_some(entry.purpose))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resource::tests::credential;
    use chrono::Utc;
    use dcp_protocol::testing::RecordingHttpClient;
    use dcp_protocol::{HttpResponse, ProtocolError};
    use serde_json::json;

    pub(crate) const LIST_URL: &str = "https://issuer.example/status/list-1";

    pub(crate) fn list_credential(list: &BitstringStatusList, purpose: &str) -> VerifiableCredential {
        let mut vc = credential(
            &["VerifiableCredential", BITSTRING_STATUS_LIST_CREDENTIAL],
            Utc::now(),
            None,
        );
        vc.id = Some(LIST_URL.into());
        vc.credential_subject = json!({
            "id": format!("{LIST_URL}#list"),
            "type": BITSTRING_STATUS_LIST,
            "statusPurpose": purpose,
            "encodedList": list.encode().unwrap(),
        });
        vc
    }

    fn entry(purpose: &str, index: usize) -> CredentialStatusEntry {
        StatusListEntry {
            purpose: purpose.into(),
            index,
            list_credential: LIST_URL.into(),
        }
        .to_credential_status()
    }

    #[test]
    fn encoded_list_is_multibase_gzip() {
        let mut list = BitstringStatusList::new(DEFAULT_BITSTRING_SIZE);
        assert_eq!(list.len(), 131_072);
        list.set(0, true).unwrap();
        list.set(94_567, true).unwrap();

        let encoded = list.encode().unwrap();
        assert!(encoded.starts_with('u'));
        let decoded = BitstringStatusList::decode(&encoded).unwrap();
        assert_eq!(decoded, list);
        assert!(decoded.get(0).unwrap());
        assert!(decoded.get(94_567).unwrap());
        assert!(!decoded.get(1).unwrap());
    }

    #[test]
    fn first_index_is_most_significant_bit() {
        let mut list = BitstringStatusList::new(16);
        list.set(0, true).unwrap();
        list.set(9, true).unwrap();
        assert_eq!(list.bits.as_raw_slice(), &[0b1000_0000, 0b0100_0000]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut list = BitstringStatusList::new(10);
        assert_eq!(list.len(), 16);
        assert_eq!(
            list.set(16, true),
            Err(StatusListError::IndexOutOfRange { index: 16, len: 16 })
        );
        assert!(BitstringStatusList::decode("u!!").is_err());
    }

    #[test]
    fn entries_parse_string_and_numeric_indices() {
        let parsed = StatusListEntry::parse(&entry("revocation", 42)).unwrap();
        assert_eq!(parsed.index, 42);
        assert_eq!(parsed.purpose, "revocation");

        let mut numeric = entry("suspension", 0);
        numeric.properties.insert(STATUS_LIST_INDEX.into(), json!(7));
        assert_eq!(StatusListEntry::parse(&numeric).unwrap().index, 7);

        numeric.properties.remove(STATUS_LIST_CREDENTIAL);
        assert_eq!(
            StatusListEntry::parse(&numeric),
            Err(StatusListError::InvalidEntry("missing 'statusListCredential'".into()))
        );
    }

    #[test]
    fn list_credentials_parse_from_jwt_payload() {
        let vc = list_credential(&BitstringStatusList::new(64), "revocation");
        let claims = json!({"iss": "did:web:issuer", "vc": vc});
        let jwt = format!(
            "eyJhbGciOiJub25lIn0.{}.sig",
            Base64UrlUnpadded::encode_string(claims.to_string().as_bytes())
        );
        assert_eq!(parse_list_credential(&jwt).unwrap(), vc);
        assert_eq!(parse_list_credential(&serde_json::to_string(&vc).unwrap()).unwrap(), vc);
    }

    fn serving(list: BitstringStatusList, purpose: &'static str) -> Arc<RecordingHttpClient> {
        Arc::new(RecordingHttpClient::new(move |request| {
            assert_eq!(request.url, LIST_URL);
            Ok(HttpResponse::ok(
                serde_json::to_string(&list_credential(&list, purpose)).unwrap(),
            ))
        }))
    }

    #[tokio::test]
    async fn set_bit_reports_the_entry_purpose() {
        let mut list = BitstringStatusList::new(DEFAULT_BITSTRING_SIZE);
        list.set(3, true).unwrap();
        let http = serving(list, "revocation");
        let service = StatusListRevocationService::new(http.clone());

        assert_eq!(service.check(&entry("revocation", 3)).await, Ok(Some("revocation".into())));
        assert_eq!(service.check(&entry("revocation", 4)).await, Ok(None));
        assert_eq!(http.request_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_list_is_an_error() {
        let http = Arc::new(RecordingHttpClient::new(|_| Err(ProtocolError::Http("HTTP 404".into()))));
        let service = StatusListRevocationService::new(http);
        let err = service.check(&entry("revocation", 3)).await.unwrap_err();
        assert_eq!(err.0, format!("status list {LIST_URL}: HTTP 404"));
    }
}

//! Turning a received credential payload into a [`VerifiableCredential`].

use serde_json::Value;
use thiserror::Error;

use crate::credential::{CredentialFormat, VerifiableCredential};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unsupported credential encoding for format {0}")]
    Unsupported(CredentialFormat),

    #[error("malformed credential: {0}")]
    Malformed(String),
}

/// Decodes a credential payload of a given format.
pub trait CredentialParser: Send + Sync {
    fn parse(&self, payload: &Value, format: CredentialFormat) -> Result<VerifiableCredential, ParseError>;
}

/// Accepts credentials embedded as JSON objects or as JSON text, in any
/// format. Compact JWS/JWT strings are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCredentialParser;

impl CredentialParser for JsonCredentialParser {
    fn parse(&self, payload: &Value, format: CredentialFormat) -> Result<VerifiableCredential, ParseError> {
        let document = match payload {
            Value::Object(_) => payload.clone(),
            Value::String(text) if text.trim_start().starts_with('{') => {
                serde_json::from_str(text).map_err(|e| ParseError::Malformed(e.to_string()))?
            }
            Value::String(_) => return Err(ParseError::Unsupported(format)),
            other => {
                return Err(ParseError::Malformed(format!(
                    "expected a JSON object or string, got {other}"
                )))
            }
        };
        serde_json::from_value(document).map_err(|e| ParseError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vc_json() -> Value {
        json!({
            "type": ["VerifiableCredential", "MembershipCredential"],
            "issuer": "did:web:issuer",
            "issuanceDate": "2025-01-01T00:00:00Z",
            "credentialSubject": {"id": "did:web:holder"}
        })
    }

    #[test]
    fn parses_objects_and_json_text() {
        let parser = JsonCredentialParser;
        let vc = parser.parse(&vc_json(), CredentialFormat::Vc1Ld).unwrap();
        assert!(vc.has_type("MembershipCredential"));

        let text = Value::String(vc_json().to_string());
        assert_eq!(parser.parse(&text, CredentialFormat::Vc1Jwt).unwrap(), vc);
    }

    #[test]
    fn rejects_compact_tokens_and_garbage() {
        let parser = JsonCredentialParser;
        assert_eq!(
            parser.parse(&json!("eyJhbGciOi.x.y"), CredentialFormat::Vc1Jwt),
            Err(ParseError::Unsupported(CredentialFormat::Vc1Jwt))
        );
        assert!(matches!(
            parser.parse(&json!(42), CredentialFormat::Vc1Jwt),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parser.parse(&json!({"issuer": "x"}), CredentialFormat::Vc1Jwt),
            Err(ParseError::Malformed(_))
        ));
    }
}

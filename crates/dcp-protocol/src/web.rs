//! `did:web` resolution.
//!
//! `did:web:example.com` resolves to `https://example.com/.well-known/did.json`;
//! `did:web:example.com:user:alice` to `https://example.com/user/alice/did.json`.
//! A percent-encoded port (`%3A`) in the domain is decoded.

use std::sync::Arc;

use async_trait::async_trait;
use dcp_core::Did;
use url::Url;

use crate::did::{DidDocument, DidResolver};
use crate::error::ProtocolError;
use crate::http::{HttpClient, HttpRequest};

pub struct WebDidResolver {
    http: Arc<dyn HttpClient>,
    use_https: bool,
}

impl WebDidResolver {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            use_https: true,
        }
    }

    /// Resolve over plain HTTP. Development and tests only.
    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    /// The URL of the DID document for `did`.
    pub fn document_url(&self, did: &str) -> Result<Url, ProtocolError> {
        let parsed = Did::new(did).map_err(|e| ProtocolError::Resolution(e.to_string()))?;
        if parsed.method() != "web" {
            return Err(ProtocolError::Resolution(format!("'{did}' is not a did:web identifier")));
        }

        let mut segments = parsed.method_specific_id().split(':');
        let domain = segments
            .next()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ProtocolError::Resolution(format!("'{did}' has no domain")))?
            .replace("%3A", ":")
            .replace("%3a", ":");
        let path: Vec<&str> = segments.collect();

        let scheme = if self.use_https { "https" } else { "http" };
        let raw = if path.is_empty() {
            format!("{scheme}://{domain}/.well-known/did.json")
        } else {
            format!("{scheme}://{domain}/{}/did.json", path.join("/"))
        };
        Url::parse(&raw).map_err(|e| ProtocolError::Resolution(format!("invalid did:web URL '{raw}': {e}")))
    }
}

#[async_trait]
impl DidResolver for WebDidResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument, ProtocolError> {
        let url = self.document_url(did)?;
        let response = self
            .http
            .execute(HttpRequest::get(url.as_str()))
            .await
            .map_err(|e| ProtocolError::Resolution(format!("failed to resolve '{did}': {e}")))?;
        let document: DidDocument = response
            .json()
            .map_err(|e| ProtocolError::Resolution(format!("invalid DID document for '{did}': {e}")))?;
        if document.id != did {
            return Err(ProtocolError::Resolution(format!(
                "DID document id '{}' does not match '{did}'",
                document.id
            )));
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqwestHttpClient;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> WebDidResolver {
        let http = Arc::new(ReqwestHttpClient::new(Duration::from_secs(5)).unwrap());
        WebDidResolver::new(http)
    }

    #[test]
    fn document_urls() {
        let r = resolver();
        assert_eq!(
            r.document_url("did:web:example.com").unwrap().as_str(),
            "https://example.com/.well-known/did.json"
        );
        assert_eq!(
            r.document_url("did:web:example.com:user:alice").unwrap().as_str(),
            "https://example.com/user/alice/did.json"
        );
        assert_eq!(
            r.document_url("did:web:localhost%3A8443").unwrap().as_str(),
            "https://localhost:8443/.well-known/did.json"
        );
        assert!(r.document_url("did:key:z6Mk").is_err());
    }

    #[tokio::test]
    async fn resolves_from_http_server() {
        let server = MockServer::start().await;
        let host = server.address().to_string().replace(':', "%3A");
        let did = format!("did:web:{host}:issuer");
        Mock::given(method("GET"))
            .and(path("/issuer/did.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": did,
                "service": [{"id": "#issuer", "type": "IssuerService", "serviceEndpoint": "http://issuer/api"}]
            })))
            .mount(&server)
            .await;

        let doc = resolver().with_https(false).resolve(&did).await.unwrap();
        assert_eq!(doc.find_service("IssuerService").unwrap().service_endpoint, "http://issuer/api");
    }

    #[tokio::test]
    async fn mismatched_document_id_rejected() {
        let server = MockServer::start().await;
        let host = server.address().to_string().replace(':', "%3A");
        let did = format!("did:web:{host}");
        Mock::given(method("GET"))
            .and(path("/.well-known/did.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "did:web:other"})))
            .mount(&server)
            .await;

        let err = resolver().with_https(false).resolve(&did).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}

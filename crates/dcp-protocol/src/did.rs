//! # DID Documents and Resolution
//!
//! The state machines need exactly one thing from a DID document: the
//! endpoint of a service with a given `type`. Service types are matched
//! case-insensitively.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dcp_core::Did;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Service types under which an issuer publishes its credential request API.
pub const ISSUER_SERVICE_TYPES: [&str; 2] = ["IssuerService", "CredentialRequest"];

/// Service type under which a holder publishes its credential storage API.
pub const CREDENTIAL_SERVICE_TYPE: &str = "CredentialService";

/// A `service[]` entry of a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

impl Service {
    pub fn new(
        id: impl Into<String>,
        service_type: impl Into<String>,
        service_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_type: service_type.into(),
            service_endpoint: service_endpoint.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<serde_json::Value>,
}

/// The subset of a W3C DID document the stack consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: String,
    #[serde(default)]
    pub service: Vec<Service>,
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
}

impl DidDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: Vec::new(),
            verification_method: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.service.push(service);
        self
    }

    /// First service whose type equals `service_type`, ignoring case.
    pub fn find_service(&self, service_type: &str) -> Option<&Service> {
        self.service
            .iter()
            .find(|s| s.service_type.eq_ignore_ascii_case(service_type))
    }

    /// First service matching any of `service_types`, in the given order.
    pub fn find_any_service(&self, service_types: &[&str]) -> Option<&Service> {
        service_types.iter().find_map(|t| self.find_service(t))
    }
}

/// Resolves a DID to its document.
#[async_trait]
pub trait DidResolver: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<DidDocument, ProtocolError>;
}

/// Dispatches resolution to the resolver registered for the DID's method.
#[derive(Default, Clone)]
pub struct DidResolverRegistry {
    resolvers: HashMap<String, Arc<dyn DidResolver>>,
}

impl DidResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, method: impl Into<String>, resolver: Arc<dyn DidResolver>) -> Self {
        self.resolvers.insert(method.into(), resolver);
        self
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

#[async_trait]
impl DidResolver for DidResolverRegistry {
    async fn resolve(&self, did: &str) -> Result<DidDocument, ProtocolError> {
        let parsed = Did::new(did).map_err(|e| ProtocolError::Resolution(e.to_string()))?;
        let resolver = self.resolvers.get(parsed.method()).ok_or_else(|| {
            ProtocolError::Resolution(format!(
                "No DID resolver registered for method '{}'",
                parsed.method()
            ))
        })?;
        resolver.resolve(did).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticDidResolver;

    fn issuer_doc() -> DidDocument {
        DidDocument::new("did:web:issuer")
            .with_service(Service::new("#cs", "CredentialService", "https://issuer/cs"))
            .with_service(Service::new("#is", "issuerservice", "https://issuer/api/issuance"))
    }

    #[test]
    fn service_lookup_ignores_case() {
        let doc = issuer_doc();
        assert_eq!(
            doc.find_service("IssuerService").map(|s| s.service_endpoint.as_str()),
            Some("https://issuer/api/issuance")
        );
        assert!(doc.find_service("Missing").is_none());
        assert_eq!(
            doc.find_any_service(&ISSUER_SERVICE_TYPES).map(|s| s.id.as_str()),
            Some("#is")
        );
    }

    #[test]
    fn document_deserializes_w3c_shape() {
        let doc: DidDocument = serde_json::from_str(
            r##"{
                "id": "did:web:holder",
                "@context": ["https://www.w3.org/ns/did/v1"],
                "service": [{"id": "#cs", "type": "CredentialService", "serviceEndpoint": "https://holder/api"}]
            }"##,
        )
        .unwrap();
        assert_eq!(doc.find_service(CREDENTIAL_SERVICE_TYPE).unwrap().service_endpoint, "https://holder/api");
        assert!(doc.verification_method.is_empty());
    }

    #[tokio::test]
    async fn registry_dispatches_by_method() {
        let web = Arc::new(StaticDidResolver::new().with_document(issuer_doc()));
        let registry = DidResolverRegistry::new().register("web", web.clone());
        assert_eq!(registry.methods(), vec!["web"]);

        let doc = registry.resolve("did:web:issuer").await.unwrap();
        assert_eq!(doc.id, "did:web:issuer");

        let err = registry.resolve("did:key:z6Mk").await.unwrap_err();
        assert_eq!(err.to_string(), "No DID resolver registered for method 'key'");

        assert!(registry.resolve("not-a-did").await.is_err());
        assert_eq!(web.calls(), vec!["did:web:issuer".to_string()]);
    }
}

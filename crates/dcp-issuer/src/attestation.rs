//! # Attestation Pipeline
//!
//! Gathers the claims an issuance decision is made on. Each
//! [`AttestationDefinition`] names an `attestationType`; the
//! [`AttestationSourceRegistry`] maps that type to a factory that builds an
//! [`AttestationSource`] from the definition's configuration.
//!
//! [`AttestationPipeline::evaluate`] runs every requested attestation and
//! merges the returned claim maps. It is fail-closed: an unknown
//! definition, an unregistered type, a bad configuration or a failing
//! source fails the whole evaluation.
//!
//! ## Built-in sources
//!
//! | Type | Source | Claims |
//! |---|---|---|
//! | `presentation` | [`PresentationAttestationSource`] | `credentialSubject` of a presented credential |
//! | `database` | [`crate::database::DatabaseAttestationSource`] | one table row keyed by holder id |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::definition::{AttestationDefinition, AttestationDefinitionStore};
use crate::holder::RequestContext;

pub type Claims = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("attestation definition '{0}' not found")]
    UnknownDefinition(String),

    #[error("no attestation source registered for type '{0}'")]
    UnknownType(String),

    #[error("invalid attestation configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Source(String),
}

/// What an attestation source sees of an issuance request.
#[derive(Debug, Clone, Copy)]
pub struct AttestationContext<'a> {
    pub participant_context_id: &'a str,
    pub request: &'a RequestContext,
}

impl AttestationContext<'_> {
    pub fn holder_id(&self) -> &str {
        &self.request.holder.holder_id
    }
}

/// Produces claims for one attestation.
#[async_trait]
pub trait AttestationSource: Send + Sync {
    async fn execute(&self, context: &AttestationContext<'_>) -> Result<Claims, AttestationError>;
}

/// Builds an [`AttestationSource`] from a definition, validating its
/// configuration.
pub trait AttestationSourceFactory: Send + Sync {
    fn create(
        &self,
        definition: &AttestationDefinition,
    ) -> Result<Arc<dyn AttestationSource>, AttestationError>;
}

#[derive(Default, Clone)]
pub struct AttestationSourceRegistry {
    factories: HashMap<String, Arc<dyn AttestationSourceFactory>>,
}

impl AttestationSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        attestation_type: impl Into<String>,
        factory: Arc<dyn AttestationSourceFactory>,
    ) -> Self {
        self.factories.insert(attestation_type.into(), factory);
        self
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn source_for(
        &self,
        definition: &AttestationDefinition,
    ) -> Result<Arc<dyn AttestationSource>, AttestationError> {
        self.factories
            .get(&definition.attestation_type)
            .ok_or_else(|| AttestationError::UnknownType(definition.attestation_type.clone()))?
            .create(definition)
    }
}

pub struct AttestationPipeline {
    definitions: AttestationDefinitionStore,
    registry: AttestationSourceRegistry,
}

impl AttestationPipeline {
    pub fn new(definitions: AttestationDefinitionStore, registry: AttestationSourceRegistry) -> Self {
        Self {
            definitions,
            registry,
        }
    }

    /// Run the attestations `ids` in order and merge their claims. A claim
    /// produced by a later attestation replaces an earlier one of the same
    /// name.
    pub async fn evaluate(
        &self,
        ids: &[String],
        context: &AttestationContext<'_>,
    ) -> Result<Claims, AttestationError> {
        let mut claims = Claims::new();
        for id in ids {
            let definition = self
                .definitions
                .find_by_id(id)
                .ok_or_else(|| AttestationError::UnknownDefinition(id.clone()))?;
            let source = self.registry.source_for(&definition)?;
            let produced = source.execute(context).await.map_err(|e| {
                tracing::debug!(attestation = %id, holder = %context.holder_id(), error = %e, "attestation failed");
                e
            })?;
            claims.extend(produced);
        }
        Ok(claims)
    }
}

// ---- Configuration helpers ----

pub(crate) fn required_str<'a>(
    definition: &'a AttestationDefinition,
    key: &str,
) -> Result<&'a str, AttestationError> {
    definition
        .configuration
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            AttestationError::Configuration(format!(
                "attestation '{}' requires string setting '{key}'",
                definition.id
            ))
        })
}

pub(crate) fn optional_bool(definition: &AttestationDefinition, key: &str, default: bool) -> bool {
    definition
        .configuration
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

// ---- Presentation source ----

pub const PRESENTATION_ATTESTATION_TYPE: &str = "presentation";

/// Claims from a credential the holder presented with the request.
///
/// Configuration: `credentialType` (required), `outputClaim` (defaults to
/// the credential type), `required` (default `true`).
#[derive(Debug, Clone)]
pub struct PresentationAttestationSource {
    credential_type: String,
    output_claim: String,
    required: bool,
}

#[async_trait]
impl AttestationSource for PresentationAttestationSource {
    async fn execute(&self, context: &AttestationContext<'_>) -> Result<Claims, AttestationError> {
        let presented = context
            .request
            .credentials
            .iter()
            .find(|vc| vc.has_type(&self.credential_type));
        match presented {
            Some(vc) => Ok(Claims::from_iter([(
                self.output_claim.clone(),
                vc.credential_subject.clone(),
            )])),
            None if self.required => Err(AttestationError::Source(format!(
                "No presented credential of type '{}'",
                self.credential_type
            ))),
            None => Ok(Claims::new()),
        }
    }
}

pub struct PresentationAttestationFactory;

impl AttestationSourceFactory for PresentationAttestationFactory {
    fn create(
        &self,
        definition: &AttestationDefinition,
    ) -> Result<Arc<dyn AttestationSource>, AttestationError> {
        let credential_type = required_str(definition, "credentialType")?.to_string();
        let output_claim = definition
            .configuration
            .get("outputClaim")
            .and_then(Value::as_str)
            .map_or_else(|| credential_type.clone(), str::to_string);
        Ok(Arc::new(PresentationAttestationSource {
            credential_type,
            output_claim,
            required: optional_bool(definition, "required", true),
        }))
    }
}

//! # Credential Generation
//!
//! Turns an approved issuance process into credentials, in two steps:
//!
//! 1. [`map_claims`] applies the definition's [`MappingDefinition`]s to the
//!    gathered claims. Output paths are rooted at the mapped claim map; the
//!    object at `credentialSubject` becomes the credential subject and an
//!    object at `credentialStatus` becomes its status entry, ahead of any
//!    status list entries allocated for the credential.
//! 2. A [`CredentialGenerator`], chosen by format from the
//!    [`CredentialGeneratorRegistry`], builds the credential.
//!
//! Signing belongs to the generator. [`UnsignedJsonGenerator`] emits the
//! credential as plain JSON and is meant for development and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dcp_core::{SharedClock, SystemClock};
use dcp_vc::{
    CredentialFormat, CredentialStatusEntry, VerifiableCredential, VerifiableCredentialContainer,
};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::attestation::Claims;
use crate::definition::{CredentialDefinition, MappingDefinition};

pub const CREDENTIAL_SUBJECT: &str = "credentialSubject";
pub const CREDENTIAL_STATUS: &str = "credentialStatus";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Mandatory claim '{0}' not found")]
    MissingClaim(String),

    #[error("cannot write claim to '{0}': a parent is not an object")]
    InvalidOutput(String),

    #[error("No generator found for format {0}")]
    UnsupportedFormat(CredentialFormat),

    #[error("credential generation failed: {0}")]
    Failed(String),
}

// ---- Claim mapping ----

fn read_path<'a>(claims: &'a Claims, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = claims.get(segments.next()?)?;
    segments.try_fold(first, |value, segment| value.get(segment))
}

fn write_path(target: &mut Claims, path: &str, value: Value) -> Result<(), GenerationError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(GenerationError::InvalidOutput(path.to_string()));
    };
    let mut current = target;
    for segment in parents {
        current = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| GenerationError::InvalidOutput(path.to_string()))?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Apply `mappings` to `claims`. A missing optional input is skipped.
pub fn map_claims(mappings: &[MappingDefinition], claims: &Claims) -> Result<Claims, GenerationError> {
    let mut mapped = Claims::new();
    for mapping in mappings {
        match read_path(claims, &mapping.input) {
            Some(value) => write_path(&mut mapped, &mapping.output, value.clone())?,
            None if mapping.required => {
                return Err(GenerationError::MissingClaim(mapping.input.clone()))
            }
            None => {}
        }
    }
    Ok(mapped)
}

// ---- Generators ----

/// Everything a generator needs for one credential.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub definition: &'a CredentialDefinition,
    pub format: CredentialFormat,
    pub issuer_did: &'a str,
    pub holder_did: &'a str,
    /// Claims after mapping.
    pub claims: &'a Claims,
    /// Status list entries allocated for this credential.
    pub credential_status: &'a [CredentialStatusEntry],
}

#[async_trait]
pub trait CredentialGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<VerifiableCredentialContainer, GenerationError>;
}

/// Dispatches generation by credential format.
#[derive(Default, Clone)]
pub struct CredentialGeneratorRegistry {
    generators: HashMap<CredentialFormat, Arc<dyn CredentialGenerator>>,
}

impl CredentialGeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, format: CredentialFormat, generator: Arc<dyn CredentialGenerator>) -> Self {
        self.generators.insert(format, generator);
        self
    }

    pub fn supports(&self, format: CredentialFormat) -> bool {
        self.generators.contains_key(&format)
    }

    /// Map `claims` with the definition's mappings and generate one
    /// credential in `format`.
    pub async fn generate(
        &self,
        definition: &CredentialDefinition,
        format: CredentialFormat,
        issuer_did: &str,
        holder_did: &str,
        claims: &Claims,
        credential_status: &[CredentialStatusEntry],
    ) -> Result<VerifiableCredentialContainer, GenerationError> {
        let generator = self
            .generators
            .get(&format)
            .ok_or(GenerationError::UnsupportedFormat(format))?;
        let mapped = map_claims(&definition.mappings, claims)?;
        generator
            .generate(&GenerationRequest {
                definition,
                format,
                issuer_did,
                holder_did,
                claims: &mapped,
                credential_status,
            })
            .await
    }
}

/// Emits unsigned JSON credentials.
pub struct UnsignedJsonGenerator {
    clock: SharedClock,
}

impl Default for UnsignedJsonGenerator {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }
}

impl UnsignedJsonGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// A registry serving every format with this generator.
    pub fn registry(self) -> CredentialGeneratorRegistry {
        let generator: Arc<dyn CredentialGenerator> = Arc::new(self);
        CredentialFormat::ALL
            .into_iter()
            .fold(CredentialGeneratorRegistry::new(), |registry, format| {
                registry.register(format, Arc::clone(&generator))
            })
    }
}

#[async_trait]
impl CredentialGenerator for UnsignedJsonGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<VerifiableCredentialContainer, GenerationError> {
        let mut subject = match request.claims.get(CREDENTIAL_SUBJECT) {
            Some(Value::Object(subject)) => subject.clone(),
            Some(other) => {
                return Err(GenerationError::Failed(format!(
                    "{CREDENTIAL_SUBJECT} must be an object, got {other}"
                )))
            }
            None => Map::new(),
        };
        subject.insert("id".into(), Value::String(request.holder_did.to_string()));

        let mut credential_status = match request.claims.get(CREDENTIAL_STATUS) {
            Some(status) => vec![serde_json::from_value::<CredentialStatusEntry>(status.clone())
                .map_err(|e| GenerationError::Failed(format!("invalid {CREDENTIAL_STATUS}: {e}")))?],
            None => Vec::new(),
        };
        credential_status.extend_from_slice(request.credential_status);

        let now = self.clock.now();
        let credential = VerifiableCredential {
            id: Some(format!("urn:uuid:{}", Uuid::new_v4())),
            types: vec![
                "VerifiableCredential".to_string(),
                request.definition.credential_type.clone(),
            ],
            issuer: request.issuer_did.to_string(),
            issuance_date: now,
            expiration_date: Some(now + Duration::seconds(request.definition.validity)),
            credential_subject: Value::Object(subject),
            credential_status,
        };
        let raw_vc = serde_json::to_string(&credential)
            .map_err(|e| GenerationError::Failed(e.to_string()))?;
        Ok(VerifiableCredentialContainer {
            raw_vc,
            format: request.format,
            credential,
        })
    }
}

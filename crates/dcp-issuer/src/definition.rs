//! # Issuance Policy Definitions
//!
//! Immutable configuration that decides who gets which credential:
//!
//! - [`CredentialDefinition`]: one issuable credential type, the format it
//!   is issued in, its validity, and the attestations, rules and claim
//!   mappings that gate and shape it.
//! - [`AttestationDefinition`]: one claim-gathering step, dispatched by
//!   `attestationType` to an attestation source.
//! - [`CredentialRuleDefinition`]: one authorization rule over the gathered
//!   claims.
//! - [`MappingDefinition`]: copies one gathered claim into the credential.
//!
//! Definitions are not state machines. They are held in a
//! [`DefinitionStore`] and referenced by id from issuance processes.

use std::collections::BTreeMap;
use std::sync::Arc;

use dcp_core::StoreError;
use dcp_vc::CredentialFormat;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default validity of a generated credential: one year.
pub const DEFAULT_VALIDITY_SECS: i64 = 365 * 24 * 3600;

fn default_validity() -> i64 {
    DEFAULT_VALIDITY_SECS
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationDefinition {
    pub id: String,
    pub attestation_type: String,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl AttestationDefinition {
    pub fn new(id: impl Into<String>, attestation_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attestation_type: attestation_type.into(),
            configuration: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRuleDefinition {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl CredentialRuleDefinition {
    pub fn new(rule_type: impl Into<String>, configuration: Map<String, Value>) -> Self {
        Self {
            rule_type: rule_type.into(),
            configuration,
        }
    }
}

/// Copy the claim at dotted path `input` to dotted path `output` of the
/// mapped claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub input: String,
    pub output: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

impl MappingDefinition {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDefinition {
    pub id: String,
    pub credential_type: String,
    pub format: CredentialFormat,
    /// Seconds a generated credential stays valid.
    #[serde(default = "default_validity")]
    pub validity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    /// Ids of the [`AttestationDefinition`]s to run.
    #[serde(default)]
    pub attestations: Vec<String>,
    #[serde(default)]
    pub rules: Vec<CredentialRuleDefinition>,
    #[serde(default)]
    pub mappings: Vec<MappingDefinition>,
}

impl CredentialDefinition {
    pub fn new(
        id: impl Into<String>,
        credential_type: impl Into<String>,
        format: CredentialFormat,
    ) -> Self {
        Self {
            id: id.into(),
            credential_type: credential_type.into(),
            format,
            validity: DEFAULT_VALIDITY_SECS,
            json_schema: None,
            attestations: Vec::new(),
            rules: Vec::new(),
            mappings: Vec::new(),
        }
    }

    pub fn with_validity(mut self, seconds: i64) -> Self {
        self.validity = seconds;
        self
    }

    pub fn with_json_schema(mut self, schema: Value) -> Self {
        self.json_schema = Some(schema);
        self
    }

    pub fn with_attestation(mut self, attestation_id: impl Into<String>) -> Self {
        self.attestations.push(attestation_id.into());
        self
    }

    pub fn with_rule(mut self, rule: CredentialRuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_mapping(mut self, mapping: MappingDefinition) -> Self {
        self.mappings.push(mapping);
        self
    }
}

/// A definition record addressable by id.
pub trait Definition: Clone + Send + Sync {
    fn id(&self) -> &str;
}

impl Definition for CredentialDefinition {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Definition for AttestationDefinition {
    fn id(&self) -> &str {
        &self.id
    }
}

// ---- Store ----

/// Thread-safe, cloneable in-memory definition store. Clones share data.
#[derive(Debug)]
pub struct DefinitionStore<T: Definition> {
    data: Arc<RwLock<BTreeMap<String, T>>>,
}

pub type CredentialDefinitionStore = DefinitionStore<CredentialDefinition>;
pub type AttestationDefinitionStore = DefinitionStore<AttestationDefinition>;

impl<T: Definition> Clone for DefinitionStore<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Definition> Default for DefinitionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Definition> DefinitionStore<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// A store preloaded with `definitions`; duplicate ids are rejected.
    pub fn from_definitions(definitions: impl IntoIterator<Item = T>) -> Result<Self, StoreError> {
        let store = Self::new();
        for definition in definitions {
            store.create(definition)?;
        }
        Ok(store)
    }

    pub fn create(&self, definition: T) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        if guard.contains_key(definition.id()) {
            return Err(StoreError::AlreadyExists {
                id: definition.id().to_string(),
            });
        }
        guard.insert(definition.id().to_string(), definition);
        Ok(())
    }

    pub fn update(&self, definition: T) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        match guard.get_mut(definition.id()) {
            Some(existing) => {
                *existing = definition;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                id: definition.id().to_string(),
            }),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// The definitions for `ids`, in the order given. Unknown ids are skipped.
    pub fn find_all(&self, ids: &[String]) -> Vec<T> {
        let guard = self.data.read();
        ids.iter().filter_map(|id| guard.get(id).cloned()).collect()
    }

    pub fn delete_by_id(&self, id: &str) -> Result<T, StoreError> {
        self.data
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    /// All definitions, ordered by id.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DefinitionStore<CredentialDefinition> {
    /// The definition issuing `credential_type`, if any.
    pub fn find_by_type(&self, credential_type: &str) -> Option<CredentialDefinition> {
        self.data
            .read()
            .values()
            .find(|d| d.credential_type == credential_type)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_from_config_defaults() {
        let def: CredentialDefinition = serde_json::from_value(json!({
            "id": "membership",
            "credentialType": "MembershipCredential",
            "format": "VC1_0_JWT",
            "attestations": ["db-1"],
            "rules": [{"type": "expression", "configuration": {"claim": "onboarding.signedDocuments", "operator": "eq", "value": true}}],
            "mappings": [{"input": "membership.since", "output": "credentialSubject.memberSince"}]
        }))
        .unwrap();
        assert_eq!(def.format, CredentialFormat::Vc1Jwt);
        assert_eq!(def.validity, DEFAULT_VALIDITY_SECS);
        assert_eq!(def.rules[0].rule_type, "expression");
        assert!(def.mappings[0].required);
    }

    #[test]
    fn store_rejects_duplicates_and_finds_by_type() {
        let store = CredentialDefinitionStore::from_definitions([
            CredentialDefinition::new("d1", "MembershipCredential", CredentialFormat::Vc1Jwt),
            CredentialDefinition::new("d2", "DemoCredential", CredentialFormat::Vc2Jose),
        ])
        .unwrap();

        let err = store
            .create(CredentialDefinition::new("d1", "Other", CredentialFormat::Vc1Jwt))
            .unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists { id: "d1".into() });

        assert_eq!(store.find_by_type("DemoCredential").map(|d| d.id), Some("d2".into()));
        assert!(store.find_by_type("Unknown").is_none());
        assert_eq!(
            store.find_all(&["d2".into(), "nope".into(), "d1".into()])
                .iter()
                .map(|d| d.id.as_str())
                .collect::<Vec<_>>(),
            vec!["d2", "d1"]
        );
    }

    #[test]
    fn clones_share_data() {
        let store = AttestationDefinitionStore::new();
        let handle = store.clone();
        handle.create(AttestationDefinition::new("a1", "database")).unwrap();
        assert_eq!(store.len(), 1);
        store.delete_by_id("a1").unwrap();
        assert!(handle.is_empty());
        assert!(matches!(store.delete_by_id("a1"), Err(StoreError::NotFound { .. })));
    }
}

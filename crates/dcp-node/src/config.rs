//! # Node Configuration
//!
//! A node is configured from one YAML file, then environment overrides are
//! applied on top:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `DATABASE_URL` | `database_url` |
//! | `DCP_OWN_DID` | `own_did` |
//! | `DCP_STS_CLIENT_SECRET` | `sts.client_secret` |
//! | `DCP_METRICS_ADDR` | `metrics_addr` |
//!
//! Without `database_url` every store is in memory and lost on restart.
//!
//! ```yaml
//! participant_context_id: acme
//! own_did: did:web:acme.example
//! sts:
//!   token_url: https://sts.acme.example/token
//!   client_id: acme
//! issuer:
//!   enabled: true
//!   holders:
//!     - holderId: holder-1
//!       did: did:web:holder.example
//!   attestations:
//!     - id: membership-db
//!       attestationType: database
//!       configuration: { tableName: membership }
//!   credential_definitions:
//!     - id: membership
//!       credentialType: MembershipCredential
//!       format: VC1_0_JWT
//!       attestations: [membership-db]
//!   status_list:
//!     base_url: https://acme.example/api/status
//! ```
//!
//! Issuer policy (`holders`, `attestations`, `credential_definitions`) keeps
//! the camelCase field names of the DCP data model.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dcp_core::Did;
use dcp_issuer::{
    AttestationDefinition, CredentialDefinition, Holder, RuleRegistry, DATABASE_ATTESTATION_TYPE,
    PRESENTATION_ATTESTATION_TYPE,
};
use dcp_protocol::RemoteStsConfig;
use dcp_state::ProcessorSettings;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

// ---- Sections ----

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StsSection {
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for StsSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StsSection")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl StsSection {
    pub fn remote_config(&self) -> RemoteStsConfig {
        RemoteStsConfig {
            token_url: self.token_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    /// Resolve `did:web` documents over https. Only disable for local testing.
    #[serde(default = "default_true")]
    pub did_web_https: bool,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            did_web_https: true,
        }
    }
}

/// Tunables shared by every state machine on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateMachineSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for StateMachineSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lease_duration_secs: default_lease_duration_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
        }
    }
}

impl StateMachineSection {
    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
        }
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HolderSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: i64,
}

impl Default for HolderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub holders: Vec<Holder>,
    #[serde(default)]
    pub attestations: Vec<AttestationDefinition>,
    #[serde(default)]
    pub credential_definitions: Vec<CredentialDefinition>,
    /// Bitstring status lists. Without it issued credentials carry no
    /// status list entries and cannot be revoked.
    #[serde(default)]
    pub status_list: Option<StatusListSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusListSection {
    /// Lists are published under `<base_url>/<list id>`.
    pub base_url: String,
    #[serde(default = "default_bitstring_size")]
    pub bitstring_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_recheck_interval_secs")]
    pub recheck_interval_secs: i64,
    /// Credentials this close to expiry are re-requested by the holder role.
    #[serde(default = "default_reissuance_grace_period_secs")]
    pub reissuance_grace_period_secs: i64,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            recheck_interval_secs: default_recheck_interval_secs(),
            reissuance_grace_period_secs: default_reissuance_grace_period_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    5
}

fn default_lease_duration_secs() -> i64 {
    dcp_state::DEFAULT_LEASE_DURATION_SECS
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    4
}

fn default_request_timeout_secs() -> i64 {
    dcp_holder::DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_recheck_interval_secs() -> i64 {
    dcp_vc::DEFAULT_RECHECK_INTERVAL_SECS
}

fn default_reissuance_grace_period_secs() -> i64 {
    dcp_vc::DEFAULT_REISSUANCE_GRACE_PERIOD_SECS
}

fn default_bitstring_size() -> usize {
    dcp_vc::DEFAULT_BITSTRING_SIZE
}

fn default_max_connections() -> u32 {
    10
}

// ---- NodeConfig ----

/// Configuration for one node.
///
/// Custom `Debug` implementation redacts `database_url`, which usually
/// carries credentials.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// The participant every entity created by this node belongs to.
    pub participant_context_id: String,
    pub own_did: String,
    /// Owner id used for leases. Defaults to a random id per start.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    pub sts: StsSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub state_machine: StateMachineSection,
    #[serde(default)]
    pub holder: HolderSection,
    #[serde(default)]
    pub issuer: IssuerSection,
    #[serde(default)]
    pub watchdog: WatchdogSection,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("participant_context_id", &self.participant_context_id)
            .field("own_did", &self.own_did)
            .field("instance_id", &self.instance_id)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("database_max_connections", &self.database_max_connections)
            .field("metrics_addr", &self.metrics_addr)
            .field("sts", &self.sts)
            .field("http", &self.http)
            .field("state_machine", &self.state_machine)
            .field("holder", &self.holder)
            .field("issuer", &self.issuer)
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

impl NodeConfig {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from `lookup`, normally the process environment.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(did) = lookup("DCP_OWN_DID") {
            self.own_did = did;
        }
        if let Some(secret) = lookup("DCP_STS_CLIENT_SECRET") {
            self.sts.client_secret = secret;
        }
        if let Some(addr) = lookup("DCP_METRICS_ADDR") {
            let addr = addr
                .parse()
                .map_err(|e| invalid("DCP_METRICS_ADDR", format!("{addr}: {e}")))?;
            self.metrics_addr = Some(addr);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participant_context_id.trim().is_empty() {
            return Err(invalid("participant_context_id", "must not be empty"));
        }
        Did::new(&self.own_did).map_err(|e| invalid("own_did", e.to_string()))?;
        if self.sts.client_secret.is_empty() {
            return Err(invalid(
                "sts.client_secret",
                "must be set in the file or through DCP_STS_CLIENT_SECRET",
            ));
        }

        let sm = &self.state_machine;
        if sm.batch_size == 0 {
            return Err(invalid("state_machine.batch_size", "must be at least 1"));
        }
        if sm.concurrency == 0 {
            return Err(invalid("state_machine.concurrency", "must be at least 1"));
        }
        if sm.lease_duration_secs <= 0 {
            return Err(invalid("state_machine.lease_duration_secs", "must be positive"));
        }
        if sm.poll_interval_ms == 0 {
            return Err(invalid("state_machine.poll_interval_ms", "must be positive"));
        }
        if self.holder.request_timeout_secs <= 0 {
            return Err(invalid("holder.request_timeout_secs", "must be positive"));
        }
        if self.watchdog.recheck_interval_secs < 0 {
            return Err(invalid("watchdog.recheck_interval_secs", "must not be negative"));
        }
        if self.watchdog.reissuance_grace_period_secs < 0 {
            return Err(invalid("watchdog.reissuance_grace_period_secs", "must not be negative"));
        }

        if self.issuer.enabled {
            self.validate_issuer()?;
        }
        Ok(())
    }

    fn validate_issuer(&self) -> Result<(), ConfigError> {
        let mut holder_ids = HashSet::new();
        for holder in &self.issuer.holders {
            Did::new(&holder.did).map_err(|e| invalid("issuer.holders", e.to_string()))?;
            if !holder_ids.insert(holder.holder_id.as_str()) {
                return Err(invalid(
                    "issuer.holders",
                    format!("duplicate holder id '{}'", holder.holder_id),
                ));
            }
        }

        let mut attestation_ids = HashSet::new();
        for attestation in &self.issuer.attestations {
            if !attestation_ids.insert(attestation.id.as_str()) {
                return Err(invalid(
                    "issuer.attestations",
                    format!("duplicate attestation id '{}'", attestation.id),
                ));
            }
            match attestation.attestation_type.as_str() {
                PRESENTATION_ATTESTATION_TYPE => {}
                DATABASE_ATTESTATION_TYPE if self.database_url.is_some() => {}
                DATABASE_ATTESTATION_TYPE => {
                    return Err(invalid(
                        "issuer.attestations",
                        format!("attestation '{}' needs database_url", attestation.id),
                    ))
                }
                other => {
                    return Err(invalid(
                        "issuer.attestations",
                        format!("unknown attestation type '{other}' in '{}'", attestation.id),
                    ))
                }
            }
        }

        if let Some(status_list) = &self.issuer.status_list {
            let field = "issuer.status_list";
            if !(status_list.base_url.starts_with("https://") || status_list.base_url.starts_with("http://")) {
                return Err(invalid(field, format!("base_url '{}' is not an http(s) URL", status_list.base_url)));
            }
            if status_list.bitstring_size == 0 {
                return Err(invalid(field, "bitstring_size must be at least 1"));
            }
        }

        let rules = RuleRegistry::default();
        let mut definition_ids = HashSet::new();
        let mut credential_types = HashSet::new();
        for definition in &self.issuer.credential_definitions {
            let field = "issuer.credential_definitions";
            if !definition_ids.insert(definition.id.as_str()) {
                return Err(invalid(field, format!("duplicate definition id '{}'", definition.id)));
            }
            if !credential_types.insert(definition.credential_type.as_str()) {
                return Err(invalid(
                    field,
                    format!("credential type '{}' defined twice", definition.credential_type),
                ));
            }
            if definition.validity <= 0 {
                return Err(invalid(field, format!("'{}' has a non-positive validity", definition.id)));
            }
            if let Some(missing) = definition
                .attestations
                .iter()
                .find(|id| !attestation_ids.contains(id.as_str()))
            {
                return Err(invalid(
                    field,
                    format!("'{}' references unknown attestation '{missing}'", definition.id),
                ));
            }
            for rule in &definition.rules {
                rules
                    .create(rule)
                    .map_err(|e| invalid(field, format!("'{}': {e}", definition.id)))?;
            }
        }
        Ok(())
    }

    /// Lease owner id for this process.
    pub fn owner(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.participant_context_id, uuid::Uuid::new_v4()))
    }
}

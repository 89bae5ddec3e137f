//! # dcp-issuer — Issuer Side
//!
//! Everything a credential issuer runs:
//!
//! - **Policy** (`definition.rs`): credential, attestation, rule and
//!   mapping definitions, held in in-memory [`DefinitionStore`]s.
//! - **Holders** (`holder.rs`): the registry of known holders and
//!   [`HolderAuthenticator`], which turns a self-issued token into a
//!   [`RequestContext`].
//! - **Attestation & Rule Evaluation** (`attestation.rs`, `database.rs`,
//!   `rule.rs`): pluggable claim sources and the `expression` rule.
//! - **Entry points** (`service.rs`): [`IssuerService`] authorizes
//!   credential requests and answers status polls.
//! - **Issuance state machine** (`process.rs`, `manager.rs`):
//!   [`IssuanceProcess`] and the processor that generates
//!   (`generator.rs`) and delivers (`delivery.rs`) credentials for
//!   `APPROVED` processes.
//! - **Credential status** (`status_list.rs`, `credential_status.rs`): the
//!   [`StatusListManager`] allocates a bitstring status list position per
//!   purpose to every generated credential and publishes the lists;
//!   [`CredentialStatusService`] revokes, suspends and resumes issued
//!   credentials.
//!
//! ## Failure reporting
//!
//! Entry points return [`dcp_core::ServiceError`]. The processor never
//! returns an error to anyone; a failed process ends in `ERRORED` with
//! `errorDetail` set.

pub mod attestation;
pub mod credential_status;
pub mod database;
pub mod definition;
pub mod delivery;
pub mod generator;
pub mod holder;
pub mod manager;
pub mod process;
pub mod rule;
pub mod service;
pub mod status_list;

pub use attestation::{
    AttestationContext, AttestationError, AttestationPipeline, AttestationSource,
    AttestationSourceFactory, AttestationSourceRegistry, Claims, PresentationAttestationFactory,
    PRESENTATION_ATTESTATION_TYPE,
};
pub use credential_status::{CredentialStatusService, STATUS_REASON};
pub use database::{DatabaseAttestationFactory, DatabaseAttestationSource, DATABASE_ATTESTATION_TYPE};
pub use definition::{
    AttestationDefinition, AttestationDefinitionStore, CredentialDefinition,
    CredentialDefinitionStore, CredentialRuleDefinition, DefinitionStore, MappingDefinition,
};
pub use delivery::{CredentialStorageClient, DcpCredentialStorageClient};
pub use generator::{
    map_claims, CredentialGenerator, CredentialGeneratorRegistry, GenerationError,
    GenerationRequest, UnsignedJsonGenerator,
};
pub use holder::{Holder, HolderAuthenticator, HolderStore, RequestContext};
pub use manager::{IssuanceProcessManager, ISSUANCE_PROCESS_ID};
pub use process::{IssuanceProcess, IssuanceProcessState};
pub use rule::{
    CredentialRule, CredentialRuleFactory, ExpressionRule, RuleError, RuleRegistry,
    EXPRESSION_RULE_TYPE,
};
pub use service::IssuerService;
pub use status_list::{StatusListCredential, StatusListManager, DEFAULT_LIST_VALIDITY_DAYS};

//! # Re-issuance
//!
//! A credential nearing its expiry is re-requested from its issuer under the
//! credential object id it was originally offered under. The holder keeps
//! that id in the resource metadata at [`CREDENTIAL_OBJECT_ID`].

use async_trait::async_trait;
use dcp_core::ServiceResult;

use crate::credential::CredentialFormat;
use crate::resource::VerifiableCredentialResource;

/// Metadata key under which the originating credential object id is kept.
pub const CREDENTIAL_OBJECT_ID: &str = "credentialObjectId";

/// Metadata key recording the holder request sent to re-issue a credential.
pub const REISSUANCE_REQUEST_ID: &str = "reissuanceRequestId";

const BASE_TYPE: &str = "VerifiableCredential";

/// What to ask the issuer for again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReissuanceRequest {
    pub participant_context_id: String,
    pub issuer_did: String,
    pub credential_object_id: String,
    pub credential_type: String,
    pub format: CredentialFormat,
}

impl ReissuanceRequest {
    /// The request for `resource`, or `None` without a credential object id.
    pub fn for_resource(resource: &VerifiableCredentialResource) -> Option<Self> {
        let credential_object_id = resource.metadata.get(CREDENTIAL_OBJECT_ID)?;
        let credential_object_id = match credential_object_id.as_str() {
            Some(id) => id.to_string(),
            None => credential_object_id.to_string(),
        };
        let credential = &resource.verifiable_credential.credential;
        let credential_type = credential.primary_type().unwrap_or(BASE_TYPE).to_string();
        Some(Self {
            participant_context_id: resource.participant_context_id.clone(),
            issuer_did: resource.issuer_id.clone(),
            credential_object_id,
            credential_type,
            format: resource.verifiable_credential.format,
        })
    }
}

/// Starts a fresh credential request. Returns the new request id.
#[async_trait]
pub trait CredentialReissuer: Send + Sync {
    async fn reissue(&self, request: ReissuanceRequest) -> ServiceResult<String>;
}

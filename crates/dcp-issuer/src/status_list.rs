//! # Status List Manager
//!
//! Maintains the issuer's bitstring status list credentials and hands out
//! list positions to newly issued credentials.
//!
//! Each [`StatusListCredential`] is its own stateful entity, kept apart
//! from the credential store so the watchdog never claims it. Each
//! participant has at most one active list per status purpose. The entity
//! tracks the next free index, the capacity and the URL the list is
//! published under. A full list is deactivated and the next allocation
//! opens a new one.
//!
//! Allocation and bit updates are read-modify-write cycles on a list.
//! They are serialized within this node and take the list's lease, so a
//! second node writing the same list fails instead of losing an update.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dcp_core::{
    Criterion, QuerySpec, ServiceError, ServiceResult, SharedClock, Stateful, StatefulEntity,
    SystemClock,
};
use dcp_state::SharedStore;
use dcp_vc::status_list::{decode_list, ENCODED_LIST};
use dcp_vc::{
    BitstringStatusList, CredentialFormat, CredentialStatusEntry, StatusListEntry, VcStatus,
    VerifiableCredential, VerifiableCredentialContainer, BITSTRING_STATUS_LIST,
    BITSTRING_STATUS_LIST_CREDENTIAL, DEFAULT_BITSTRING_SIZE, REVOCATION, SUSPENSION,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Validity of a newly opened status list credential.
pub const DEFAULT_LIST_VALIDITY_DAYS: i64 = 365;

// ---- Entity ----

/// A published status list credential and its allocation cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusListCredential {
    #[serde(flatten)]
    pub entity: StatefulEntity,
    pub participant_context_id: String,
    pub status_purpose: String,
    pub public_url: String,
    /// Next unallocated index.
    pub current_index: usize,
    pub bitstring_size: usize,
    pub is_active: bool,
    pub credential: VerifiableCredentialContainer,
}

impl StatusListCredential {
    fn open(
        id: String,
        participant_context_id: &str,
        purpose: &str,
        public_url: String,
        credential: VerifiableCredentialContainer,
        bitstring_size: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity: StatefulEntity::new(id, VcStatus::Issued.code(), now),
            participant_context_id: participant_context_id.to_string(),
            status_purpose: purpose.to_string(),
            public_url,
            current_index: 0,
            bitstring_size,
            is_active: true,
            credential,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_index >= self.bitstring_size
    }

    pub fn bits(&self) -> ServiceResult<BitstringStatusList> {
        Ok(decode_list(&self.credential.credential)?)
    }

    /// Set or clear one bit and re-encode the credential. Returns whether
    /// the bit changed.
    fn update_bit(&mut self, index: usize, value: bool) -> ServiceResult<bool> {
        let mut bits = self.bits()?;
        if bits.get(index)? == value {
            return Ok(false);
        }
        bits.set(index, value)?;
        let mut credential = self.credential.credential.clone();
        credential
            .credential_subject
            .as_object_mut()
            .ok_or_else(|| {
                ServiceError::Persistence(format!("status list '{}' has no subject object", self.entity.id))
            })?
            .insert(ENCODED_LIST.into(), Value::String(bits.encode()?));
        self.credential = container(credential)?;
        Ok(true)
    }
}

impl Stateful for StatusListCredential {
    const KIND: &'static str = "status_list_credential";

    fn entity(&self) -> &StatefulEntity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut StatefulEntity {
        &mut self.entity
    }
}

fn container(credential: VerifiableCredential) -> ServiceResult<VerifiableCredentialContainer> {
    Ok(VerifiableCredentialContainer {
        raw_vc: serde_json::to_string(&credential).map_err(|e| ServiceError::Persistence(e.to_string()))?,
        format: CredentialFormat::Vc1Jwt,
        credential,
    })
}

// ---- Manager ----

pub struct StatusListManager {
    lists: SharedStore<StatusListCredential>,
    issuer_did: String,
    base_url: String,
    bitstring_size: usize,
    purposes: Vec<String>,
    clock: SharedClock,
    write_lock: Mutex<()>,
}

impl StatusListManager {
    /// Lists are published under `base_url/<list id>`.
    pub fn new(
        lists: SharedStore<StatusListCredential>,
        issuer_did: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            lists,
            issuer_did: issuer_did.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bitstring_size: DEFAULT_BITSTRING_SIZE,
            purposes: vec![REVOCATION.to_string(), SUSPENSION.to_string()],
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bitstring_size(mut self, size: usize) -> Self {
        self.bitstring_size = size;
        self
    }

    /// Status purposes every issued credential gets an entry for.
    pub fn with_purposes<I, S>(mut self, purposes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.purposes = purposes.into_iter().map(Into::into).collect();
        self
    }

    /// One fresh status entry per configured purpose.
    pub async fn allocate(&self, participant_context_id: &str) -> ServiceResult<Vec<CredentialStatusEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut entries = Vec::with_capacity(self.purposes.len());
        for purpose in &self.purposes {
            entries.push(self.allocate_one(participant_context_id, purpose).await?);
        }
        Ok(entries)
    }

    async fn allocate_one(&self, participant_context_id: &str, purpose: &str) -> ServiceResult<CredentialStatusEntry> {
        let list_id = match self.active_list(participant_context_id, purpose).await? {
            Some(list) => list.entity.id,
            None => self.open_list(participant_context_id, purpose).await?,
        };

        let mut list = self.lists.find_by_id_and_lease(&list_id).await?;
        let index = list.current_index;
        list.current_index += 1;
        if list.is_full() {
            list.is_active = false;
            tracing::info!(entity_id = %list_id, purpose = %purpose, "status list full, deactivated");
        }
        self.lists.save(&list).await?;

        Ok(StatusListEntry {
            purpose: purpose.to_string(),
            index,
            list_credential: list.public_url,
        }
        .to_credential_status())
    }

    async fn active_list(
        &self,
        participant_context_id: &str,
        purpose: &str,
    ) -> ServiceResult<Option<StatusListCredential>> {
        let lists = self
            .lists
            .query(
                &QuerySpec::new()
                    .with_filter(Criterion::eq("participantContextId", participant_context_id))
                    .with_filter(Criterion::eq("statusPurpose", purpose))
                    .with_filter(Criterion::eq("isActive", true)),
            )
            .await?;
        Ok(lists.into_iter().find(|list| !list.is_full()))
    }

    /// Create an empty, active list. Returns its id.
    async fn open_list(&self, participant_context_id: &str, purpose: &str) -> ServiceResult<String> {
        let id = Uuid::new_v4().to_string();
        let url = format!("{}/{id}", self.base_url);
        let now = self.clock.now();
        let credential = VerifiableCredential {
            id: Some(url.clone()),
            types: vec![
                "VerifiableCredential".to_string(),
                BITSTRING_STATUS_LIST_CREDENTIAL.to_string(),
            ],
            issuer: self.issuer_did.clone(),
            issuance_date: now,
            expiration_date: Some(now + Duration::days(DEFAULT_LIST_VALIDITY_DAYS)),
            credential_subject: json!({
                "id": format!("{url}#list"),
                "type": BITSTRING_STATUS_LIST,
                "statusPurpose": purpose,
                "encodedList": BitstringStatusList::new(self.bitstring_size).encode()?,
            }),
            credential_status: Vec::new(),
        };
        let list = StatusListCredential::open(
            id.clone(),
            participant_context_id,
            purpose,
            url.clone(),
            container(credential)?,
            self.bitstring_size,
            now,
        );
        self.lists.create(&list).await?;
        tracing::info!(entity_id = %id, purpose = %purpose, url = %url, "opened status list");
        Ok(id)
    }

    /// The list published at `url`.
    async fn find_by_url(&self, url: &str) -> ServiceResult<StatusListCredential> {
        self.lists
            .query(&QuerySpec::new().with_filter(Criterion::eq("publicUrl", url)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound(format!("No status list credential published at '{url}'")))
    }

    /// Whether the bit behind `entry` is set.
    pub async fn get(&self, entry: &StatusListEntry) -> ServiceResult<bool> {
        let list = self.find_by_url(&entry.list_credential).await?;
        Ok(list.bits()?.get(entry.index)?)
    }

    /// Set or clear the bit behind `entry`. Returns whether it changed.
    pub async fn set(&self, entry: &StatusListEntry, value: bool) -> ServiceResult<bool> {
        let _guard = self.write_lock.lock().await;
        let list_id = self.find_by_url(&entry.list_credential).await?.entity.id;
        let mut list = self.lists.find_by_id_and_lease(&list_id).await?;

        match list.update_bit(entry.index, value) {
            Ok(true) => {
                self.lists.save(&list).await?;
                tracing::info!(entity_id = %list_id, index = entry.index, value, "status list updated");
                Ok(true)
            }
            Ok(false) => {
                self.lists.break_lease(&list_id).await?;
                Ok(false)
            }
            Err(e) => {
                self.lists.break_lease(&list_id).await?;
                Err(e)
            }
        }
    }

    /// The list credential with id `list_id`, as published.
    pub async fn list_credential(&self, list_id: &str) -> ServiceResult<String> {
        self.lists
            .find_by_id(list_id)
            .await?
            .map(|list| list.credential.raw_vc)
            .ok_or_else(|| ServiceError::NotFound(format!("No status list credential with id '{list_id}'")))
    }
}

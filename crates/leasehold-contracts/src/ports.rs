//! Collaborator interfaces
//!
//! Notification delivery, document rendering and the phone directory live
//! outside this crate. Each port has an in-memory implementation used by
//! tests and by the development server.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use leasehold_signature::hash_sha256;
use leasehold_types::{Contract, LeaseholdError, Result, UserId};

use crate::notifier::{mask_phone, NoticeKind, Outbound};

// =============================================================================
// Notification dispatch
// =============================================================================

/// Outbound messaging (SMS, WhatsApp, push). Failures are logged by the
/// caller and never roll back a transition.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_otp(&self, phone: &str, code: &str) -> Result<()>;

    async fn notify(&self, user: &UserId, kind: NoticeKind, payload: &Value) -> Result<()>;
}

/// Writes every message to the log, with phone numbers masked and codes
/// withheld
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_otp(&self, phone: &str, _code: &str) -> Result<()> {
        info!(phone = %mask_phone(phone), "OTP dispatched");
        Ok(())
    }

    async fn notify(&self, user: &UserId, kind: NoticeKind, _payload: &Value) -> Result<()> {
        info!(user = %user, kind = kind.as_str(), "Notification dispatched");
        Ok(())
    }
}

/// Keeps every delivered message; lets tests read OTP codes back
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    delivered: Mutex<Vec<Outbound>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Outbound> {
        self.delivered.lock().clone()
    }

    /// Most recent code sent to `phone`
    pub fn last_code_for(&self, phone: &str) -> Option<String> {
        self.delivered.lock().iter().rev().find_map(|message| match message {
            Outbound::Otp { phone: to, code } if to == phone => Some(code.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_otp(&self, phone: &str, code: &str) -> Result<()> {
        self.delivered.lock().push(Outbound::Otp {
            phone: phone.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }

    async fn notify(&self, user: &UserId, kind: NoticeKind, payload: &Value) -> Result<()> {
        self.delivered.lock().push(Outbound::Notice {
            user: user.clone(),
            kind,
            payload: payload.clone(),
        });
        Ok(())
    }
}

// =============================================================================
// Party directory
// =============================================================================

/// Contact details held by the identity service
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn phone_for(&self, user: &UserId) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    phones: DashMap<UserId, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user: UserId, phone: impl Into<String>) {
        self.phones.insert(user, phone.into());
    }
}

#[async_trait]
impl PartyDirectory for InMemoryDirectory {
    async fn phone_for(&self, user: &UserId) -> Option<String> {
        self.phones.get(user).map(|p| p.clone())
    }
}

// =============================================================================
// Document rendering and storage
// =============================================================================

/// Where a rendered document landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub storage_ref: String,
    pub disk: String,
    /// SHA-256 of the stored bytes
    pub content_hash: String,
    pub encrypted: bool,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn render(&self, contract: &Contract) -> Result<RenderedDocument>;

    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>>;

    async fn delete(&self, storage_ref: &str) -> Result<()>;
}

/// Renders the contract as JSON and keeps the bytes in memory
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<String, Vec<u8>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn render(&self, contract: &Contract) -> Result<RenderedDocument> {
        let bytes = serde_json::to_vec_pretty(&serde_json::json!({
            "reference": contract.reference,
            "landlord_id": contract.landlord_id,
            "tenant_id": contract.tenant_id,
            "terms": contract.terms,
            "signatures": contract.signatures,
            "content_hash": contract.content_hash,
            "rendered_at": Utc::now(),
        }))
        .map_err(|e| LeaseholdError::DocumentStore {
            reason: e.to_string(),
        })?;

        let storage_ref = format!("contracts/{}.json", contract.reference);
        let content_hash = hash_sha256(&bytes);
        self.documents.insert(storage_ref.clone(), bytes);

        Ok(RenderedDocument {
            storage_ref,
            disk: "memory".to_string(),
            content_hash,
            encrypted: false,
        })
    }

    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>> {
        self.documents
            .get(storage_ref)
            .map(|d| d.clone())
            .ok_or_else(|| LeaseholdError::DocumentStore {
                reason: format!("no document at {}", storage_ref),
            })
    }

    async fn delete(&self, storage_ref: &str) -> Result<()> {
        self.documents.remove(storage_ref);
        Ok(())
    }
}

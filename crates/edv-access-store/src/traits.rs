//! EdvStore trait: the abstract interface for an encrypted data vault.
//!
//! A store holds the encrypted documents of one vault. Every call carries an
//! [`Invocation`]; implementations check it before touching any data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use edv_access_core::{Action, BlindedQuery, DocumentId, EncryptedDocument, Invocation};

use crate::error::{Result, StoreError};

/// Identity of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultInfo {
    pub id: String,
    /// Principal that controls the vault and roots every capability on it.
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Invocation target of the vault's documents collection.
    pub documents: String,
}

impl VaultInfo {
    pub fn new(id: impl Into<String>, controller: impl Into<String>, base_url: &str) -> Self {
        let id = id.into();
        let documents = format!("{}/edvs/{}/documents", base_url.trim_end_matches('/'), id);
        Self {
            id,
            controller: controller.into(),
            reference_id: None,
            documents,
        }
    }
}

/// Invocation target of a single document.
pub fn document_target(documents: &str, id: &DocumentId) -> String {
    format!("{}/{}", documents, id)
}

/// Check that `invocation` authorizes `action` on `target` in a vault
/// controlled by `controller`.
pub fn authorize(
    controller: &str,
    invocation: &Invocation,
    action: Action,
    target: &str,
) -> Result<()> {
    invocation
        .verify_rooted(controller, action, target)
        .map_err(|e| StoreError::PermissionDenied(e.to_string()))
}

/// Shared write-time checks for an update.
pub(crate) fn check_update(stored: &EncryptedDocument, doc: &EncryptedDocument) -> Result<()> {
    if stored.sequence.checked_add(1) != Some(doc.sequence) {
        return Err(StoreError::Conflict(format!(
            "document {} is at sequence {}, write carries {}",
            doc.id, stored.sequence, doc.sequence
        )));
    }
    Ok(())
}

/// The EdvStore trait: async interface for one vault's documents.
///
/// # Design Notes
///
/// - **Versioning**: `insert` requires sequence 0; `update` requires exactly
///   one more than the stored sequence and otherwise fails with `Conflict`.
/// - **Unique attributes**: a write whose unique index terms collide with
///   another document fails with `Duplicate`.
/// - **Soft misses**: `get` returns `None` and `delete` returns `false` for
///   unknown ids.
#[async_trait]
pub trait EdvStore: Send + Sync {
    /// The vault this store serves.
    fn vault(&self) -> &VaultInfo;

    /// Store a new document.
    async fn insert(&self, doc: &EncryptedDocument, invocation: &Invocation) -> Result<()>;

    /// Replace an existing document.
    async fn update(&self, doc: &EncryptedDocument, invocation: &Invocation) -> Result<()>;

    /// Fetch a document by id.
    async fn get(
        &self,
        id: &DocumentId,
        invocation: &Invocation,
    ) -> Result<Option<EncryptedDocument>>;

    /// Find documents matching a blinded query.
    async fn find(
        &self,
        query: &BlindedQuery,
        invocation: &Invocation,
    ) -> Result<Vec<EncryptedDocument>>;

    /// Delete a document. Returns `false` if it did not exist.
    async fn delete(&self, id: &DocumentId, invocation: &Invocation) -> Result<bool>;
}

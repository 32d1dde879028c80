//! In-memory implementation of the EdvStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use edv_access_core::{Action, BlindedQuery, DocumentId, EncryptedDocument, Invocation};

use crate::error::{Result, StoreError};
use crate::traits::{authorize, check_update, document_target, EdvStore, VaultInfo};

/// In-memory vault.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryEdv {
    vault: VaultInfo,
    documents: RwLock<BTreeMap<DocumentId, EncryptedDocument>>,
}

impl MemoryEdv {
    /// Create a new empty vault.
    pub fn new(vault: VaultInfo) -> Self {
        Self {
            vault,
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_unique(
        docs: &BTreeMap<DocumentId, EncryptedDocument>,
        doc: &EncryptedDocument,
    ) -> Result<()> {
        match docs.values().find_map(|other| doc.unique_collision(other)) {
            Some(name) => Err(StoreError::Duplicate(format!(
                "unique attribute {} already in use",
                name
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EdvStore for MemoryEdv {
    fn vault(&self) -> &VaultInfo {
        &self.vault
    }

    async fn insert(&self, doc: &EncryptedDocument, invocation: &Invocation) -> Result<()> {
        authorize(&self.vault.controller, invocation, Action::Write, &self.vault.documents)?;
        if doc.sequence != 0 {
            return Err(StoreError::InvalidData(format!(
                "new document {} must have sequence 0",
                doc.id
            )));
        }

        let mut docs = self.documents.write().map_err(|_| StoreError::Poisoned)?;
        if docs.contains_key(&doc.id) {
            return Err(StoreError::Duplicate(format!("document {} exists", doc.id)));
        }
        Self::check_unique(&docs, doc)?;

        docs.insert(doc.id.clone(), doc.clone());
        debug!(id = %doc.id, "inserted document");
        Ok(())
    }

    async fn update(&self, doc: &EncryptedDocument, invocation: &Invocation) -> Result<()> {
        let target = document_target(&self.vault.documents, &doc.id);
        authorize(&self.vault.controller, invocation, Action::Write, &target)?;

        let mut docs = self.documents.write().map_err(|_| StoreError::Poisoned)?;
        let stored = docs
            .get(&doc.id)
            .ok_or_else(|| StoreError::NotFound(doc.id.to_string()))?;
        check_update(stored, doc)?;
        Self::check_unique(&docs, doc)?;

        docs.insert(doc.id.clone(), doc.clone());
        debug!(id = %doc.id, sequence = doc.sequence, "updated document");
        Ok(())
    }

    async fn get(
        &self,
        id: &DocumentId,
        invocation: &Invocation,
    ) -> Result<Option<EncryptedDocument>> {
        let target = document_target(&self.vault.documents, id);
        authorize(&self.vault.controller, invocation, Action::Read, &target)?;

        let docs = self.documents.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.get(id).cloned())
    }

    async fn find(
        &self,
        query: &BlindedQuery,
        invocation: &Invocation,
    ) -> Result<Vec<EncryptedDocument>> {
        authorize(&self.vault.controller, invocation, Action::Read, &self.vault.documents)?;

        let docs = self.documents.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.values().filter(|doc| doc.matches(query)).cloned().collect())
    }

    async fn delete(&self, id: &DocumentId, invocation: &Invocation) -> Result<bool> {
        let target = document_target(&self.vault.documents, id);
        authorize(&self.vault.controller, invocation, Action::Write, &target)?;

        let mut docs = self.documents.write().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use edv_access_core::Keypair;

    use super::*;
    use crate::traits::testing::*;

    fn setup() -> (Keypair, MemoryEdv) {
        let controller = Keypair::generate();
        let store = MemoryEdv::new(vault(&controller));
        (controller, store)
    }

    fn write_inv(kp: &Keypair, store: &MemoryEdv, id: &str) -> Invocation {
        let target = document_target(&store.vault().documents, &DocumentId::from(id));
        invoke(kp, store.vault(), Action::Write, &target)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (kp, store) = setup();
        let docs = store.vault().documents.clone();
        let doc = encrypted("z1", 0, &[("t", "A", false)]);

        store.insert(&doc, &invoke(&kp, store.vault(), Action::Write, &docs)).await.unwrap();

        let target = document_target(&docs, &doc.id);
        let got = store
            .get(&doc.id, &invoke(&kp, store.vault(), Action::Read, &target))
            .await
            .unwrap();
        assert_eq!(got, Some(doc));
    }

    #[tokio::test]
    async fn test_update_requires_next_sequence() {
        let (kp, store) = setup();
        let docs = store.vault().documents.clone();
        store
            .insert(&encrypted("z1", 0, &[]), &invoke(&kp, store.vault(), Action::Write, &docs))
            .await
            .unwrap();

        let inv = write_inv(&kp, &store, "z1");
        store.update(&encrypted("z1", 1, &[]), &inv).await.unwrap();

        let stale = store.update(&encrypted("z1", 1, &[]), &inv).await;
        assert!(matches!(
            stale,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unique_attribute_enforced() {
        let (kp, store) = setup();
        let inv = invoke(&kp, store.vault(), Action::Write, &store.vault().documents.clone());

        store.insert(&encrypted("z1", 0, &[("id", "x", true)]), &inv).await.unwrap();
        let dup = store.insert(&encrypted("z2", 0, &[("id", "x", true)]), &inv).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_find_filters_by_blinded_terms() {
        let (kp, store) = setup();
        let docs = store.vault().documents.clone();
        let inv = invoke(&kp, store.vault(), Action::Write, &docs);
        store.insert(&encrypted("z1", 0, &[("t", "A", false)]), &inv).await.unwrap();
        store.insert(&encrypted("z2", 0, &[("t", "B", false)]), &inv).await.unwrap();
        store.insert(&encrypted("z3", 0, &[("t", "C", false)]), &inv).await.unwrap();

        let query = BlindedQuery {
            index: "hmac-1".into(),
            equals: ["A", "B"]
                .iter()
                .map(|t| BTreeMap::from([("t".to_string(), t.to_string())]))
                .collect(),
            has: vec![],
        };
        let found = store
            .find(&query, &invoke(&kp, store.vault(), Action::Read, &docs))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["z1", "z2"]);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let (kp, store) = setup();
        let docs = store.vault().documents.clone();
        store
            .insert(&encrypted("z1", 0, &[]), &invoke(&kp, store.vault(), Action::Write, &docs))
            .await
            .unwrap();

        let inv = write_inv(&kp, &store, "z1");
        assert!(store.delete(&DocumentId::from("z1"), &inv).await.unwrap());
        assert!(!store.delete(&DocumentId::from("z1"), &inv).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_invocation_cannot_write() {
        let (kp, store) = setup();
        let docs = store.vault().documents.clone();
        let read = invoke(&kp, store.vault(), Action::Read, &docs);

        let result = store.insert(&encrypted("z1", 0, &[]), &read).await;
        assert!(matches!(result, Err(StoreError::PermissionDenied(_))));
        assert!(store.is_empty());
    }
}

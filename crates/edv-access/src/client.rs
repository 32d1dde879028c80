//! Encrypted document client: CRUD over one vault with sealing and blinded
//! indexes, every call authorized by one capability.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};
use tracing::debug;

use edv_access_core::{
    index_term, now_millis, Action, BlindedAttribute, BlindedQuery, Capability, Document,
    DocumentId, EncryptedDocument, FindQuery, IndexedEntry, Invocation, Keypair,
};
use edv_access_perms::{decode_content, encode_content, open, seal, PermsError, SharedKey};
use edv_access_store::{document_target, EdvStore};

use crate::controller::{Hmac, KeyAgreementKey};
use crate::error::{AccessError, Result};

/// Invocation target type of a vault's documents collection.
pub const EDV_DOCUMENTS_TARGET_TYPE: &str = "urn:edv:documents";

/// Separates a field name from its value before blinding a term.
const TERM_SEPARATOR: u8 = 0x1f;

/// Everything an [`EncryptedDocumentClient`] is built from.
pub struct ClientParts {
    pub store: Arc<dyn EdvStore>,
    pub key_agreement_key: KeyAgreementKey,
    pub hmac: Hmac,
    /// Capability over the vault's documents collection.
    pub capability: Capability,
    pub signer: Arc<Keypair>,
}

/// Client for the encrypted documents of one vault.
///
/// # Design Notes
///
/// - **Sealing**: `content` and `meta` are CBOR-encoded and sealed to the
///   key-agreement key; only the document id and sequence travel in clear
/// - **Indexes**: declared attributes are blinded with the HMAC key and
///   rebuilt on every write
/// - **Versioning**: `write` inserts when `sequence` is `None` and otherwise
///   writes `sequence + 1`; a lost race surfaces as a conflict
pub struct EncryptedDocumentClient {
    store: Arc<dyn EdvStore>,
    key_agreement_key: KeyAgreementKey,
    hmac: Hmac,
    capability: Capability,
    signer: Arc<Keypair>,
    indexes: RwLock<BTreeMap<String, bool>>,
}

impl EncryptedDocumentClient {
    pub fn new(parts: ClientParts) -> Self {
        Self {
            store: parts.store,
            key_agreement_key: parts.key_agreement_key,
            hmac: parts.hmac,
            capability: parts.capability,
            signer: parts.signer,
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Declare an indexed attribute such as `content.type`.
    ///
    /// Repeating a declaration is a no-op; declaring an attribute unique
    /// once keeps it unique.
    pub fn ensure_index(&self, attribute: &str, unique: bool) -> Result<()> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        let entry = indexes.entry(attribute.to_string()).or_insert(unique);
        *entry |= unique;
        Ok(())
    }

    /// Declared attributes and whether each is unique.
    pub fn indexes(&self) -> Result<BTreeMap<String, bool>> {
        Ok(self.indexes.read().map_err(|_| poisoned())?.clone())
    }

    /// Find documents matching `query`.
    ///
    /// At least one of `id`, `type`, `equals` or `has` must be given.
    pub async fn find(&self, query: &FindQuery) -> Result<Vec<Document>> {
        if query.is_empty() {
            return Err(AccessError::InvalidArgument(
                "one of \"id\", \"type\", \"equals\" or \"has\" is required".into(),
            ));
        }

        let mut blinded = BlindedQuery {
            index: self.hmac.id().to_string(),
            equals: Vec::new(),
            has: Vec::new(),
        };
        for clause in query.clauses() {
            let mut terms = BTreeMap::new();
            for (field, value) in &clause {
                terms.insert(
                    self.blind_name(field).await?,
                    self.blind_term(field, value).await?,
                );
            }
            blinded.equals.push(terms);
        }
        for field in &query.has {
            blinded.has.push(self.blind_name(field).await?);
        }

        let invocation = self.invoke(Action::Read, &self.store.vault().documents)?;
        let found = self.store.find(&blinded, &invocation).await?;
        debug!(clauses = blinded.equals.len(), found = found.len(), "find documents");

        let mut documents = Vec::with_capacity(found.len());
        for encrypted in &found {
            documents.push(self.decrypt(encrypted).await?);
        }
        Ok(documents)
    }

    /// Read and open a document.
    pub async fn read(&self, id: &DocumentId) -> Result<Document> {
        let target = document_target(&self.store.vault().documents, id);
        let invocation = self.invoke(Action::Read, &target)?;
        let encrypted = self
            .store
            .get(id, &invocation)
            .await?
            .ok_or_else(|| AccessError::NotFound(id.to_string()))?;
        self.decrypt(&encrypted).await
    }

    /// Seal and store a document, returning it at its new sequence.
    pub async fn write(&self, doc: &Document) -> Result<Document> {
        let sequence = match doc.sequence {
            None => 0,
            Some(current) => current.checked_add(1).ok_or_else(|| {
                AccessError::InvalidArgument(format!("{} sequence overflow", doc.id))
            })?,
        };
        let encrypted = self.encrypt(doc, sequence).await?;

        if doc.sequence.is_none() {
            let invocation = self.invoke(Action::Write, &self.store.vault().documents)?;
            self.store.insert(&encrypted, &invocation).await?;
        } else {
            let target = document_target(&self.store.vault().documents, &doc.id);
            let invocation = self.invoke(Action::Write, &target)?;
            self.store.update(&encrypted, &invocation).await?;
        }
        debug!(id = %doc.id, sequence, "wrote document");

        Ok(Document {
            sequence: Some(sequence),
            ..doc.clone()
        })
    }

    /// Delete a document. Returns `false` if it did not exist.
    pub async fn delete(&self, id: &DocumentId) -> Result<bool> {
        let target = document_target(&self.store.vault().documents, id);
        let invocation = self.invoke(Action::Write, &target)?;
        Ok(self.store.delete(id, &invocation).await?)
    }

    fn invoke(&self, action: Action, target: &str) -> Result<Invocation> {
        Ok(Invocation::sign(
            &self.signer,
            self.capability.clone(),
            action,
            target,
            now_millis(),
        )?)
    }

    async fn blind_name(&self, field: &str) -> Result<String> {
        Ok(hex::encode(self.hmac.sign(field.as_bytes()).await?))
    }

    async fn blind_term(&self, field: &str, value: &Value) -> Result<String> {
        let mut data = field.as_bytes().to_vec();
        data.push(TERM_SEPARATOR);
        data.extend_from_slice(index_term(value).as_bytes());
        Ok(hex::encode(self.hmac.sign(&data).await?))
    }

    async fn index(&self, doc: &Document, sequence: u64) -> Result<IndexedEntry> {
        let mut attributes = Vec::new();
        for (field, unique) in self.indexes()? {
            let Some(value) = doc.field(&field) else {
                continue;
            };
            attributes.push(BlindedAttribute {
                name: self.blind_name(&field).await?,
                value: self.blind_term(&field, value).await?,
                unique,
            });
        }
        Ok(IndexedEntry {
            hmac_id: self.hmac.id().to_string(),
            sequence,
            attributes,
        })
    }

    async fn encrypt(&self, doc: &Document, sequence: u64) -> Result<EncryptedDocument> {
        let plaintext = encode_content(&json!({ "content": doc.content, "meta": doc.meta }))?;
        let kid = self.key_agreement_key.id();
        let recipient = self.key_agreement_key.public_key().await?;
        Ok(EncryptedDocument {
            id: doc.id.clone(),
            sequence,
            indexed: vec![self.index(doc, sequence).await?],
            sealed: seal(&plaintext, kid, &recipient)?,
        })
    }

    async fn decrypt(&self, encrypted: &EncryptedDocument) -> Result<Document> {
        let kid = self.key_agreement_key.id();
        let recipient = encrypted
            .sealed
            .recipient(kid)
            .ok_or_else(|| PermsError::NotARecipient(kid.to_string()))?;
        let shared: SharedKey = self
            .key_agreement_key
            .derive_secret(&recipient.ephemeral_public_key)
            .await?;
        let plaintext = open(&encrypted.sealed, kid, &shared)?;

        let mut body = match decode_content(&plaintext)? {
            Value::Object(body) => body,
            _ => {
                return Err(AccessError::InvalidArgument(format!(
                    "{} opened to a non-object body",
                    encrypted.id
                )))
            }
        };
        let content = body.remove("content").unwrap_or(Value::Null);
        let meta = match body.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        Ok(Document {
            id: encrypted.id.clone(),
            sequence: Some(encrypted.sequence),
            content,
            meta,
        })
    }
}

fn poisoned() -> AccessError {
    AccessError::InvalidArgument("index declarations lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use edv_access_core::{KeyKind, CONTENT_ID, CONTENT_TYPE};
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::fixture;

    fn doc(content: Value) -> Document {
        Document::new(DocumentId::generate(), content)
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let fx = fixture().await;
        let written = fx
            .client
            .write(&doc(json!({"id": "u-1", "type": "User", "name": "Ada"})))
            .await
            .unwrap();
        assert_eq!(written.sequence, Some(0));

        let read = fx.client.read(&written.id).await.unwrap();
        assert_eq!(read, written);

        let stored = fx.stored(&written.id).await;
        let raw = serde_json::to_string(&stored).unwrap();
        assert!(!raw.contains("Ada"));
        assert!(!raw.contains(CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_update_and_stale_write_conflicts() {
        let fx = fixture().await;
        let first = fx.client.write(&doc(json!({"type": "User"}))).await.unwrap();

        let mut second = first.clone();
        second.content = json!({"type": "User", "a": 2});
        let second = fx.client.write(&second).await.unwrap();
        assert_eq!(second.sequence, Some(1));

        let stale = fx.client.write(&first).await.unwrap_err();
        assert_eq!(stale.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_empty_find_rejected() {
        let fx = fixture().await;
        let err = fx.client.find(&FindQuery::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_find_by_id_and_has() {
        let fx = fixture().await;
        fx.client
            .write(&doc(json!({"id": "a", "type": "User"})).with_meta(
                json!({"token": {"id": "t-1"}}).as_object().cloned().unwrap(),
            ))
            .await
            .unwrap();
        fx.client
            .write(&doc(json!({"id": "b", "type": "User"})))
            .await
            .unwrap();

        let by_id = fx.client.find(&FindQuery::by_id("b")).await.unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].field(CONTENT_ID), Some(&json!("b")));

        let with_token = fx.client.find(&FindQuery::new().has("meta.token.id")).await.unwrap();
        assert_eq!(with_token.len(), 1);
        assert_eq!(with_token[0].field(CONTENT_ID), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_unique_content_id_enforced() {
        let fx = fixture().await;
        fx.client.write(&doc(json!({"id": "a", "type": "User"}))).await.unwrap();
        let err = fx
            .client
            .write(&doc(json!({"id": "a", "type": "User"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn test_delete_missing_is_false() {
        let fx = fixture().await;
        let written = fx.client.write(&doc(json!({"type": "User"}))).await.unwrap();
        assert!(fx.client.delete(&written.id).await.unwrap());
        assert!(!fx.client.delete(&written.id).await.unwrap());
        assert_eq!(
            fx.client.read(&written.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_ensure_index_idempotent() {
        let fx = fixture().await;
        fx.client.ensure_index("meta.revoked", false).unwrap();
        fx.client.ensure_index("meta.revoked", false).unwrap();
        fx.client.ensure_index(CONTENT_ID, false).unwrap();
        let indexes = fx.client.indexes().unwrap();
        assert_eq!(indexes.get("meta.revoked"), Some(&false));
        assert_eq!(indexes.get(CONTENT_ID), Some(&true));
    }

    #[tokio::test]
    async fn test_other_recipient_cannot_open() {
        let fx = fixture().await;
        let written = fx.client.write(&doc(json!({"type": "User"}))).await.unwrap();

        let other_kak = fx.controller.generate_key(KeyKind::KeyAgreement).await.unwrap();
        let other = fx.client_with_kak(&other_kak);
        let err = other.read(&written.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }
}

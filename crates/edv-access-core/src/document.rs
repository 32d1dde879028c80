//! Documents in plaintext and stored (encrypted) form.
//!
//! A [`Document`] is what applications read and write. What a vault stores is
//! an [`EncryptedDocument`]: the sealed content plus HMAC-blinded index
//! entries the vault can match queries against without seeing plaintext.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{hex_bytes, hex_vec, X25519PublicKey};
use crate::types::DocumentId;

/// A plaintext document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Stored version; `None` until the document is first written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    pub content: Value,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Document {
    /// A document that has never been written.
    pub fn new(id: DocumentId, content: Value) -> Self {
        Self {
            id,
            sequence: None,
            content,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// The `type` field of the content, if it is a string.
    pub fn content_type(&self) -> Option<&str> {
        self.content.get("type").and_then(Value::as_str)
    }

    /// Look up a dot-addressed field such as `content.type` or `meta.token.id`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = match segments.next()? {
            "content" => &self.content,
            "meta" => self.meta.get(segments.next()?)?,
            _ => return None,
        };
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

/// Render a JSON value as an index term.
///
/// Terms are the compact JSON encoding, so `"1"` and `1` index differently.
pub fn index_term(value: &Value) -> String {
    value.to_string()
}

/// A single blinded attribute of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedAttribute {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
}

/// Index terms produced with one HMAC key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEntry {
    pub hmac_id: String,
    pub sequence: u64,
    pub attributes: Vec<BlindedAttribute>,
}

/// Content key wrapped for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedRecipient {
    /// Key id of the recipient's key-agreement key.
    pub kid: String,
    pub ephemeral_public_key: X25519PublicKey,
    #[serde(with = "hex_vec")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub nonce: [u8; 12],
}

/// Encrypted document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedContent {
    pub recipients: Vec<SealedRecipient>,
    #[serde(with = "hex_bytes")]
    pub nonce: [u8; 12],
    #[serde(with = "hex_vec")]
    pub ciphertext: Vec<u8>,
}

impl SealedContent {
    /// Find the wrapped key for a recipient key id.
    pub fn recipient(&self, kid: &str) -> Option<&SealedRecipient> {
        self.recipients.iter().find(|r| r.kid == kid)
    }
}

/// The stored form of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedDocument {
    pub id: DocumentId,
    pub sequence: u64,
    #[serde(default)]
    pub indexed: Vec<IndexedEntry>,
    pub sealed: SealedContent,
}

impl EncryptedDocument {
    /// Whether this document satisfies a blinded query.
    ///
    /// `equals` clauses are alternatives; every term inside one clause must
    /// match. Every `has` name must be present. Both conditions must hold.
    pub fn matches(&self, query: &BlindedQuery) -> bool {
        let Some(entry) = self.indexed.iter().find(|e| e.hmac_id == query.index) else {
            return false;
        };
        let has_term = |name: &str, value: Option<&str>| {
            entry
                .attributes
                .iter()
                .any(|a| a.name == name && value.map_or(true, |v| a.value == v))
        };

        let has_ok = query.has.iter().all(|name| has_term(name.as_str(), None));
        let equals_ok = query.equals.is_empty()
            || query.equals.iter().any(|clause| {
                clause
                    .iter()
                    .all(|(n, v)| has_term(n.as_str(), Some(v.as_str())))
            });
        has_ok && equals_ok
    }

    /// Unique attributes as `(hmac_id, name, value)` triples.
    pub fn unique_terms(&self) -> impl Iterator<Item = (&str, &str, &str)> + '_ {
        self.indexed.iter().flat_map(|entry| {
            entry
                .attributes
                .iter()
                .filter(|a| a.unique)
                .map(move |a| (entry.hmac_id.as_str(), a.name.as_str(), a.value.as_str()))
        })
    }

    /// Name of a unique attribute this document shares with `other`, if any.
    pub fn unique_collision(&self, other: &EncryptedDocument) -> Option<String> {
        if self.id == other.id {
            return None;
        }
        self.unique_terms()
            .find(|term| other.unique_terms().any(|o| o == *term))
            .map(|(_, name, _)| name.to_string())
    }
}

/// A query whose names and values have been blinded with an HMAC key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedQuery {
    /// Id of the HMAC key that produced the terms.
    pub index: String,
    #[serde(default)]
    pub equals: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub has: Vec<String>,
}

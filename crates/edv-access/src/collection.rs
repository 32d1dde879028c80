//! Typed collections of documents sharing one `content.type`.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use edv_access_core::{Document, DocumentId, FindQuery, CONTENT_ID, CONTENT_TYPE};

use crate::client::EncryptedDocumentClient;
use crate::config::RetryPolicy;
use crate::error::{AccessError, Result};
use crate::retry::read_modify_write;

/// Token id an item can be looked up by.
pub const META_TOKEN_ID: &str = "meta.token.id";
/// Revocation flag toggled by [`Collection::set_revoked`].
pub const META_REVOKED: &str = "meta.revoked";

/// Indexes every collection declares: `(attribute, unique)`.
pub const DEFAULT_INDEXES: [(&str, bool); 4] = [
    (CONTENT_ID, true),
    (CONTENT_TYPE, false),
    (META_TOKEN_ID, true),
    (META_REVOKED, false),
];

/// Selector for [`Collection::get`]. When both are set, `id` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    pub id: Option<String>,
    pub token: Option<String>,
}

impl Lookup {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            token: None,
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            id: None,
            token: Some(token.into()),
        }
    }
}

/// A typed view over an [`EncryptedDocumentClient`].
///
/// Items are the JSON `content` of documents; every item carries `type`
/// equal to the collection's type and an application-level `id`.
pub struct Collection {
    content_type: String,
    client: Arc<EncryptedDocumentClient>,
    retry: RetryPolicy,
}

impl Collection {
    /// Bind `client` to `content_type`, declaring the default indexes.
    pub fn new(
        content_type: impl Into<String>,
        client: Arc<EncryptedDocumentClient>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        for (attribute, unique) in DEFAULT_INDEXES {
            client.ensure_index(attribute, unique)?;
        }
        Ok(Self {
            content_type: content_type.into(),
            client,
            retry,
        })
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn client(&self) -> &EncryptedDocumentClient {
        &self.client
    }

    fn check_type(&self, item: &Value) -> Result<()> {
        let found = item.get("type").and_then(Value::as_str);
        if found == Some(self.content_type.as_str()) {
            return Ok(());
        }
        Err(AccessError::TypeMismatch {
            expected: self.content_type.clone(),
            found: found.map_or_else(|| "undefined".to_string(), str::to_string),
        })
    }

    /// Store a new item under a fresh document id.
    pub async fn create(&self, item: Value, meta: Option<Map<String, Value>>) -> Result<Document> {
        self.check_type(&item)?;
        let doc = Document::new(DocumentId::generate(), item).with_meta(meta.unwrap_or_default());
        let written = self.client.write(&doc).await?;
        debug!(id = %written.id, content_type = %self.content_type, "created item");
        Ok(written)
    }

    /// First document matching `lookup`, if any.
    pub async fn get(&self, lookup: &Lookup) -> Result<Option<Document>> {
        let query = match (&lookup.id, &lookup.token) {
            (Some(id), _) => FindQuery::by_id(id.clone()),
            (None, Some(token)) => FindQuery::by_type(self.content_type.clone())
                .equals([(META_TOKEN_ID, json!(token))]),
            (None, None) => {
                return Err(AccessError::InvalidArgument(
                    "\"id\" or \"token\" must be given".into(),
                ))
            }
        };
        Ok(self.client.find(&query).await?.into_iter().next())
    }

    /// Every document of this collection's type.
    pub async fn get_all(&self) -> Result<Vec<Document>> {
        self.client
            .find(&FindQuery::by_type(self.content_type.clone()))
            .await
    }

    /// Replace an item's content, and its meta when given.
    ///
    /// The stored document is re-read before the merge and conflicting writes
    /// are retried, so a conflict never reaches the caller.
    pub async fn update(&self, item: Value, meta: Option<Map<String, Value>>) -> Result<Document> {
        self.check_type(&item)?;
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AccessError::InvalidArgument("\"item.id\" is required".into()))?
            .to_string();
        let existing = self
            .get(&Lookup::id(id.clone()))
            .await?
            .ok_or_else(|| AccessError::NotFound(id))?;

        read_modify_write(&self.client, &existing.id, &self.retry, |doc| {
            doc.content = item.clone();
            if let Some(meta) = &meta {
                doc.meta = meta.clone();
            }
            true
        })
        .await
    }

    /// Delete an item. Returns `false` if there is none with `id`.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        match self.get(&Lookup::id(id)).await? {
            Some(existing) => self.client.delete(&existing.id).await,
            None => Ok(false),
        }
    }

    /// Set `meta.revoked` on an item, retrying on conflict.
    pub async fn set_revoked(&self, id: &str, revoked: bool) -> Result<Document> {
        let existing = self
            .get(&Lookup::id(id))
            .await?
            .ok_or_else(|| AccessError::NotFound(id.to_string()))?;

        read_modify_write(&self.client, &existing.id, &self.retry, |doc| {
            if doc.meta.get("revoked") == Some(&Value::Bool(revoked)) {
                return false;
            }
            doc.meta.insert("revoked".to_string(), Value::Bool(revoked));
            true
        })
        .await
    }
}

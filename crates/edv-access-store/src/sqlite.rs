//! SQLite implementation of the EdvStore trait.
//!
//! This is the persistent vault backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use edv_access_core::{
    now_millis, Action, BlindedQuery, DocumentId, EncryptedDocument, Invocation,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{authorize, check_update, document_target, EdvStore, VaultInfo};

/// SQLite-backed vault.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteEdv {
    vault: VaultInfo,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEdv {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>, vault: VaultInfo) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            vault,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory(vault: VaultInfo) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            vault,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn encode(doc: &EncryptedDocument) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(doc, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode(body: &[u8]) -> Result<EncryptedDocument> {
    ciborium::from_reader(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn load(tx: &Connection, id: &str) -> Result<Option<EncryptedDocument>> {
    let body: Option<Vec<u8>> = tx
        .query_row("SELECT body FROM documents WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    body.as_deref().map(decode).transpose()
}

/// Replace the index rows of a document.
fn write_attributes(tx: &Transaction<'_>, doc: &EncryptedDocument) -> Result<()> {
    let id = doc.id.as_str();
    tx.execute("DELETE FROM attributes WHERE doc_id = ?1", params![id])?;
    tx.execute("DELETE FROM unique_attributes WHERE doc_id = ?1", params![id])?;

    for (hmac_id, name, value) in doc.unique_terms() {
        let owner: Option<String> = tx
            .query_row(
                "SELECT doc_id FROM unique_attributes
                 WHERE hmac_id = ?1 AND name = ?2 AND value = ?3",
                params![hmac_id, name, value],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            Some(owner) if owner != id => {
                return Err(StoreError::Duplicate(format!(
                    "unique attribute {} already in use",
                    name
                )));
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO unique_attributes (hmac_id, name, value, doc_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![hmac_id, name, value, id],
                )?;
            }
        }
    }

    let mut stmt = tx.prepare(
        "INSERT INTO attributes (doc_id, hmac_id, name, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &doc.indexed {
        for attribute in &entry.attributes {
            stmt.execute(params![id, entry.hmac_id, attribute.name, attribute.value])?;
        }
    }
    Ok(())
}

#[async_trait]
impl EdvStore for SqliteEdv {
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

        let doc = doc.clone();
        let body = encode(&doc)?;
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            if load(&tx, doc.id.as_str())?.is_some() {
                return Err(StoreError::Duplicate(format!("document {} exists", doc.id)));
            }
            tx.execute(
                "INSERT INTO documents (id, sequence, body, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![doc.id.as_str(), doc.sequence as i64, body, now_millis()],
            )?;
            write_attributes(&tx, &doc)?;
            tx.commit()?;
            debug!(id = %doc.id, "inserted document");
            Ok(())
        })
        .await
    }

    async fn update(&self, doc: &EncryptedDocument, invocation: &Invocation) -> Result<()> {
        let target = document_target(&self.vault.documents, &doc.id);
        authorize(&self.vault.controller, invocation, Action::Write, &target)?;

        let doc = doc.clone();
        let body = encode(&doc)?;
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let stored = load(&tx, doc.id.as_str())?
                .ok_or_else(|| StoreError::NotFound(doc.id.to_string()))?;
            check_update(&stored, &doc)?;

            tx.execute(
                "UPDATE documents SET sequence = ?2, body = ?3, updated_at = ?4 WHERE id = ?1",
                params![doc.id.as_str(), doc.sequence as i64, body, now_millis()],
            )?;
            write_attributes(&tx, &doc)?;
            tx.commit()?;
            debug!(id = %doc.id, sequence = doc.sequence, "updated document");
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        id: &DocumentId,
        invocation: &Invocation,
    ) -> Result<Option<EncryptedDocument>> {
        let target = document_target(&self.vault.documents, id);
        authorize(&self.vault.controller, invocation, Action::Read, &target)?;

        let id = id.clone();
        self.blocking(move |conn| load(conn, id.as_str())).await
    }

    async fn find(
        &self,
        query: &BlindedQuery,
        invocation: &Invocation,
    ) -> Result<Vec<EncryptedDocument>> {
        authorize(&self.vault.controller, invocation, Action::Read, &self.vault.documents)?;

        let query = query.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT d.body FROM documents d
                 WHERE EXISTS (
                     SELECT 1 FROM attributes a WHERE a.doc_id = d.id AND a.hmac_id = ?1
                 )
                 ORDER BY d.id",
            )?;
            let bodies = stmt
                .query_map(params![query.index], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut found = Vec::new();
            for body in bodies {
                let doc = decode(&body)?;
                if doc.matches(&query) {
                    found.push(doc);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn delete(&self, id: &DocumentId, invocation: &Invocation) -> Result<bool> {
        let target = document_target(&self.vault.documents, id);
        authorize(&self.vault.controller, invocation, Action::Write, &target)?;

        let id = id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])?;
            tx.execute("DELETE FROM attributes WHERE doc_id = ?1", params![id.as_str()])?;
            tx.execute("DELETE FROM unique_attributes WHERE doc_id = ?1", params![id.as_str()])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }
}

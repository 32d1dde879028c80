//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Document serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Document not found.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The stored sequence moved on since the document was read.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A document id or unique attribute is already taken.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The invocation does not authorize the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid data supplied or found in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A remote vault failed to answer.
    #[error("remote vault error: {0}")]
    Remote(String),

    /// A lock guarding in-process state was poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

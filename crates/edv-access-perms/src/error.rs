//! Error types for sealing and delegation.

use thiserror::Error;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Role tag not recognized.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Sealed content has no entry for this key.
    #[error("not a recipient: {0}")]
    NotARecipient(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] edv_access_core::CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;

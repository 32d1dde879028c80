//! Error types for the core primitives.

use thiserror::Error;

/// Errors raised while checking keys, signatures and capabilities.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid principal id: {0}")]
    InvalidPrincipal(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

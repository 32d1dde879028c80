//! Error types for the access layer.

use edv_access_core::CoreError;
use edv_access_perms::PermsError;
use edv_access_remote::RemoteError;
use edv_access_store::StoreError;
use thiserror::Error;

/// Errors that can occur during access-layer operations.
#[derive(Debug, Error)]
pub enum AccessError {
    /// A required selector or field was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An item's `type` does not match its collection.
    #[error("\"item.type\" ({found}) must be \"{expected}\"")]
    TypeMismatch { expected: String, found: String },

    /// The document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A required capability is missing.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The conflict-retry loop ran out of attempts.
    #[error("retry exhausted after {attempts} conflicting writes")]
    RetryExhausted { attempts: u32 },

    /// The conflict-retry loop ran past its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Vault error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry, KMS or service error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Sealing or delegation error.
    #[error("permission error: {0}")]
    Perms(#[from] PermsError),

    /// Key, signature or capability error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for access-layer operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Structured classification of an [`AccessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    TypeMismatch,
    NotFound,
    Conflict,
    Duplicate,
    PermissionDenied,
    RetryExhausted,
    Timeout,
    Crypto,
    Transport,
}

impl AccessError {
    /// Classify this error so callers can branch without matching wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AccessError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            AccessError::NotFound(_) => ErrorKind::NotFound,
            AccessError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AccessError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            AccessError::Timeout(_) => ErrorKind::Timeout,
            AccessError::Store(e) => store_kind(e),
            AccessError::Remote(e) => remote_kind(e),
            AccessError::Perms(e) => perms_kind(e),
            AccessError::Core(e) => core_kind(e),
        }
    }

    /// Whether this is a version race worth retrying.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::NotFound(_) => ErrorKind::NotFound,
        StoreError::Conflict(_) => ErrorKind::Conflict,
        StoreError::Duplicate(_) => ErrorKind::Duplicate,
        StoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        StoreError::InvalidData(_) => ErrorKind::InvalidArgument,
        _ => ErrorKind::Transport,
    }
}

fn remote_kind(e: &RemoteError) -> ErrorKind {
    match e {
        RemoteError::NotFound(_) => ErrorKind::NotFound,
        RemoteError::Conflict(_) => ErrorKind::Conflict,
        RemoteError::Duplicate(_) => ErrorKind::Duplicate,
        RemoteError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        RemoteError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        RemoteError::Timeout(_) => ErrorKind::Timeout,
        RemoteError::Core(e) => core_kind(e),
        _ => ErrorKind::Transport,
    }
}

fn perms_kind(e: &PermsError) -> ErrorKind {
    match e {
        PermsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        PermsError::UnknownRole(_) | PermsError::SerializationError(_) => ErrorKind::InvalidArgument,
        PermsError::NotARecipient(_)
        | PermsError::EncryptionError(_)
        | PermsError::DecryptionError(_) => ErrorKind::Crypto,
        PermsError::CoreError(e) => core_kind(e),
    }
}

fn core_kind(e: &CoreError) -> ErrorKind {
    match e {
        CoreError::Unauthorized(_) | CoreError::InvalidCapability(_) => ErrorKind::PermissionDenied,
        CoreError::InvalidSignature | CoreError::InvalidPublicKey => ErrorKind::Crypto,
        CoreError::InvalidPrincipal(_)
        | CoreError::EncodingError(_)
        | CoreError::DecodingError(_) => ErrorKind::InvalidArgument,
    }
}

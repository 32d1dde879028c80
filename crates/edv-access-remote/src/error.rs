//! Error types for remote collaborators.

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur talking to a registry, KMS, vault or instance service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A version race on the remote resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A unique id or attribute is already taken.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The service refused the invocation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The service rejected the request as malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other non-success response.
    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Request or response body could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] edv_access_core::CoreError),
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout(e.to_string())
        } else if e.is_decode() {
            RemoteError::Encoding(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

impl From<RemoteError> for edv_access_store::StoreError {
    fn from(e: RemoteError) -> Self {
        use edv_access_store::StoreError;
        match e {
            RemoteError::NotFound(m) => StoreError::NotFound(m),
            RemoteError::Conflict(m) => StoreError::Conflict(m),
            RemoteError::Duplicate(m) => StoreError::Duplicate(m),
            RemoteError::PermissionDenied(m) => StoreError::PermissionDenied(m),
            RemoteError::InvalidArgument(m) => StoreError::InvalidData(m),
            RemoteError::Encoding(m) => StoreError::Serialization(m),
            other => StoreError::Remote(other.to_string()),
        }
    }
}

/// Error body returned by the services: `{type, message}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Map a non-success status and body to an error.
///
/// Bodies of the form `{type, message}` are rendered as `"type: message"`;
/// anything else falls back to the raw body or the status reason.
pub fn error_for_status(status: u16, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = match &parsed {
        Some(b) => format!("{}: {}", b.error_type, b.message),
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => format!("HTTP {}", status),
    };
    let duplicate = parsed
        .as_ref()
        .map_or(false, |b| b.error_type == "DuplicateError");

    match status {
        400 => RemoteError::InvalidArgument(message),
        401 | 403 => RemoteError::PermissionDenied(message),
        404 => RemoteError::NotFound(message),
        409 if duplicate => RemoteError::Duplicate(message),
        409 => RemoteError::Conflict(message),
        408 | 504 => RemoteError::Timeout(message),
        _ => RemoteError::Service { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_body_rendered_as_type_and_message() {
        let err = error_for_status(404, r#"{"type":"NotFoundError","message":"Instance not found."}"#);
        match err {
            RemoteError::NotFound(m) => assert_eq!(m, "NotFoundError: Instance not found."),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(error_for_status(400, ""), RemoteError::InvalidArgument(_)));
        assert!(matches!(error_for_status(403, ""), RemoteError::PermissionDenied(_)));
        assert!(matches!(error_for_status(409, "{}"), RemoteError::Conflict(_)));
        assert!(matches!(
            error_for_status(409, r#"{"type":"DuplicateError","message":"taken"}"#),
            RemoteError::Duplicate(_)
        ));
        assert!(matches!(
            error_for_status(500, "boom"),
            RemoteError::Service { status: 500, ref message } if message == "boom"
        ));
    }

    #[test]
    fn test_store_error_mapping_keeps_conflict() {
        let store: edv_access_store::StoreError = RemoteError::Conflict("seq".into()).into();
        assert!(matches!(store, edv_access_store::StoreError::Conflict(_)));
    }
}

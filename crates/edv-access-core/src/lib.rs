//! # EDV Access Core
//!
//! Pure data types for capability-scoped access to encrypted data vaults:
//! principals and keys, capabilities (zcaps), signed invocations, documents
//! and their blinded index form, and find queries.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Capability`] - Authorization to perform actions on a target
//! - [`Invocation`] - A signed request exercising a capability
//! - [`Document`] - Plaintext document as applications see it
//! - [`EncryptedDocument`] - Stored form with sealed content and blinded indexes
//! - [`FindQuery`] - Plaintext query, expanded into OR-ed equality clauses

pub mod capability;
pub mod crypto;
pub mod document;
pub mod error;
pub mod invocation;
pub mod query;
pub mod types;

pub use capability::{Action, ActionSet, Capability, CapabilityProof, InvocationTarget};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, X25519PublicKey, PRINCIPAL_PREFIX};
pub use document::{
    index_term, BlindedAttribute, BlindedQuery, Document, EncryptedDocument, IndexedEntry,
    SealedContent, SealedRecipient,
};
pub use error::{CoreError, Result};
pub use invocation::Invocation;
pub use query::{FindQuery, TypeFilter, CONTENT_ID, CONTENT_TYPE};
pub use types::{DocumentId, KeyKind, KeyRef};

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

//! Strong type definitions shared across the workspace.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an encrypted document within a vault.
///
/// Generated client-side from 128 random bits, so the id can be chosen
/// before the first write.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh random document id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("z{}", hex::encode(bytes)))
    }

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of key held by a key-management service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// X25519 key used to unwrap content keys.
    #[serde(rename = "X25519KeyAgreementKey2019")]
    KeyAgreement,
    /// Keyed hash used to blind index terms.
    #[serde(rename = "Sha256HmacKey2019")]
    Hmac,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::KeyAgreement => f.write_str("X25519KeyAgreementKey2019"),
            KeyKind::Hmac => f.write_str("Sha256HmacKey2019"),
        }
    }
}

/// Reference to a key held by a key-management service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: KeyKind,
}

impl KeyRef {
    pub fn new(id: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

//! Cryptographic primitives shared across the workspace.
//!
//! Wraps Ed25519 signing and BLAKE3 derivation with strong types. Public keys
//! double as principal identifiers (`urn:key:ed25519:<hex>`) so any verifier
//! can recover the key of an invoker or delegator from its id alone.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Prefix of principal ids derived from Ed25519 public keys.
pub const PRINCIPAL_PREFIX: &str = "urn:key:ed25519:";

/// BLAKE3 context used to turn an account secret into a signing seed.
const CONTROLLER_KEY_CONTEXT: &str = "edv-access v1 controller signing key";

/// Serde adapter encoding fixed-size byte arrays as hex strings.
pub mod hex_bytes {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected {} bytes, got {}", N, v.len())))
    }
}

/// Serde adapter encoding variable-length byte strings as hex.
pub mod hex_vec {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(D::Error::custom)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl Ed25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// The principal id for this key.
    pub fn to_principal(&self) -> String {
        format!("{}{}", PRINCIPAL_PREFIX, self.to_hex())
    }

    /// Recover the public key from a principal id.
    pub fn from_principal(principal: &str) -> Result<Self, CoreError> {
        let hex_part = principal
            .strip_prefix(PRINCIPAL_PREFIX)
            .ok_or_else(|| CoreError::InvalidPrincipal(principal.to_string()))?;
        Self::from_hex(hex_part).map_err(|_| CoreError::InvalidPrincipal(principal.to_string()))
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519Signature(#[serde(with = "hex_bytes")] pub [u8; 64]);

impl Ed25519Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &self.to_hex()[..16])
    }
}

/// A 32-byte X25519 public key.
///
/// Only the bytes live here; key agreement itself is done by the perms crate
/// or by the key-management service holding the secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &hex::encode(self.0)[..16])
    }
}

/// A signing keypair for a controller.
///
/// This wraps ed25519-dalek's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Deterministically derive a keypair from an account secret.
    ///
    /// The handle scopes the secret, so one secret can back several accounts
    /// without their keys colliding.
    pub fn derive(secret: &[u8], handle: &str) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(CONTROLLER_KEY_CONTEXT);
        hasher.update(&(secret.len() as u64).to_be_bytes());
        hasher.update(secret);
        hasher.update(handle.as_bytes());
        Self::from_seed(hasher.finalize().as_bytes())
    }

    /// Get the public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// The principal id of this keypair.
    pub fn principal(&self) -> String {
        self.public_key().to_principal()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.signing_key.sign(message);
        Ed25519Signature(sig.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

/// Verify a signature made by the key behind `principal`.
pub fn verify_principal(
    principal: &str,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CoreError> {
    Ed25519PublicKey::from_principal(principal)?.verify(message, signature)
}

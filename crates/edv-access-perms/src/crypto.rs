//! Key agreement and content encryption.
//!
//! Provides X25519 key agreement and ChaCha20-Poly1305 authenticated
//! encryption for sealing document content.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use edv_access_core::X25519PublicKey;

use crate::error::{PermsError, Result};

/// BLAKE3 context for wrapping-key derivation.
const WRAP_KEY_CONTEXT: &str = "edv-access v1 content key wrapping";

/// A static X25519 secret, as held by a key-management service.
pub struct KeyAgreementSecret(StaticSecret);

impl KeyAgreementSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Secret bytes, for persisting inside a key store.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from_bytes(*PublicKey::from(&self.0).as_bytes())
    }

    /// Agree on a shared secret with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&PublicKey::from(peer_public.0));
        SharedKey(*shared.as_bytes())
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from_bytes(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the ephemeral secret; it can only be used once.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer_public.0));
        SharedKey(*shared.as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Wrap raw agreement output, e.g. as returned by a remote KMS.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the key that wraps a content key for recipient `kid`.
    pub fn derive_wrap_key(&self, kid: &str) -> ContentKey {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(kid.as_bytes());
        ContentKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit ChaCha20-Poly1305 key.
#[derive(Clone)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::EncryptionError(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| PermsError::EncryptionError(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::DecryptionError(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| PermsError::DecryptionError(e.to_string()))
    }
}

/// A fresh random 96-bit nonce.
pub fn random_nonce() -> [u8; 12] {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

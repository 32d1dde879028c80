//! Sealed document content.
//!
//! Content is encrypted with a fresh content key. The content key is then
//! wrapped for each recipient key-agreement key using an ephemeral X25519
//! agreement, so a recipient only needs its KMS-held secret to open it.

use serde_json::Value;

use edv_access_core::{SealedContent, SealedRecipient, X25519PublicKey};

use crate::crypto::{random_nonce, ContentKey, EphemeralKeyPair, SharedKey};
use crate::error::{PermsError, Result};

/// Encode JSON content as the CBOR plaintext that gets sealed.
pub fn encode_content(content: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(content, &mut buf)
        .map_err(|e| PermsError::SerializationError(e.to_string()))?;
    Ok(buf)
}

/// Decode opened plaintext back into JSON content.
pub fn decode_content(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
}

/// Seal `plaintext` to the recipient key `kid`.
pub fn seal(plaintext: &[u8], kid: &str, recipient: &X25519PublicKey) -> Result<SealedContent> {
    let content_key = ContentKey::generate();
    let nonce = random_nonce();
    let ciphertext = content_key.encrypt(plaintext, &nonce)?;

    Ok(SealedContent {
        recipients: vec![wrap_for(&content_key, kid, recipient)?],
        nonce,
        ciphertext,
    })
}

fn wrap_for(
    content_key: &ContentKey,
    kid: &str,
    recipient: &X25519PublicKey,
) -> Result<SealedRecipient> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public_key = ephemeral.public_key();
    let wrap_key = ephemeral.diffie_hellman(recipient).derive_wrap_key(kid);

    let nonce = random_nonce();
    let encrypted_key = wrap_key.encrypt(content_key.as_bytes(), &nonce)?;

    Ok(SealedRecipient {
        kid: kid.to_string(),
        ephemeral_public_key,
        encrypted_key,
        nonce,
    })
}

/// Open sealed content for recipient `kid`.
///
/// `shared` is the agreement between the recipient's secret and the
/// recipient entry's ephemeral public key, usually obtained from a KMS.
pub fn open(sealed: &SealedContent, kid: &str, shared: &SharedKey) -> Result<Vec<u8>> {
    let recipient = sealed
        .recipient(kid)
        .ok_or_else(|| PermsError::NotARecipient(kid.to_string()))?;

    let wrap_key = shared.derive_wrap_key(kid);
    let key_bytes = wrap_key.decrypt(&recipient.encrypted_key, &recipient.nonce)?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| PermsError::DecryptionError("content key has wrong length".into()))?;

    ContentKey::from_bytes(key_bytes).decrypt(&sealed.ciphertext, &sealed.nonce)
}

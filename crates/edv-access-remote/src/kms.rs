//! Key-management service: keystores, key generation and capability-gated
//! key operations.
//!
//! Secrets never leave the KMS. Callers hold key ids and ask the service to
//! derive a shared secret or sign data, presenting an [`Invocation`] each time.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rand::RngCore;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use edv_access_core::{Action, Invocation, KeyKind, X25519PublicKey};
use edv_access_perms::KeyAgreementSecret;

use crate::config::ServiceConfig;
use crate::error::{RemoteError, Result};
use crate::http::{optional, HttpClient};

const KEYSTORES_ROUTE: &str = "/kms/keystores";

/// Configuration of a keystore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoreConfig {
    /// Assigned by the KMS on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sequence: u64,
    pub controller: String,
    pub invoker: String,
    pub delegator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl KeystoreConfig {
    /// A fresh configuration fully controlled by `controller`.
    pub fn new(controller: impl Into<String>, reference_id: Option<String>) -> Self {
        let controller = controller.into();
        Self {
            id: None,
            sequence: 0,
            invoker: controller.clone(),
            delegator: controller.clone(),
            controller,
            reference_id,
        }
    }
}

/// Public description of a key held by the KMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: KeyKind,
    /// Present for key-agreement keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<X25519PublicKey>,
}

/// Client interface to a key-management service.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Find a keystore by controller and reference id.
    async fn find_keystore(
        &self,
        controller: &str,
        reference_id: &str,
    ) -> Result<Option<KeystoreConfig>>;

    /// Create a keystore; returns the stored configuration with its id.
    async fn create_keystore(&self, config: &KeystoreConfig) -> Result<KeystoreConfig>;

    /// Generate a key in `keystore`. Requires `write` on the keystore.
    async fn generate_key(
        &self,
        keystore: &str,
        kind: KeyKind,
        invocation: &Invocation,
    ) -> Result<KeyDescription>;

    /// Describe a key. Key descriptions are public.
    async fn describe_key(&self, key_id: &str) -> Result<KeyDescription>;

    /// X25519 agreement between the key and `public_key`. Requires `deriveSecret`.
    async fn derive_secret(
        &self,
        key_id: &str,
        public_key: &X25519PublicKey,
        invocation: &Invocation,
    ) -> Result<[u8; 32]>;

    /// MAC `data` with an HMAC key. Requires `sign`.
    async fn sign(&self, key_id: &str, data: &[u8], invocation: &Invocation) -> Result<Vec<u8>>;
}

/// KMS client over HTTP.
pub struct HttpKms {
    http: HttpClient,
}

impl HttpKms {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }
}

#[derive(Deserialize)]
struct SecretResponse {
    secret: String,
}

#[derive(Deserialize)]
struct SignatureResponse {
    signature: String,
}

#[async_trait]
impl KeyManagement for HttpKms {
    async fn find_keystore(
        &self,
        controller: &str,
        reference_id: &str,
    ) -> Result<Option<KeystoreConfig>> {
        let url = self.http.url(KEYSTORES_ROUTE, &[])?;
        let request = self
            .http
            .request(Method::GET, url)
            .query(&[("controller", controller), ("referenceId", reference_id)]);
        let found: Option<Vec<KeystoreConfig>> = optional(self.http.get_json(request).await)?;
        Ok(found.and_then(|configs| configs.into_iter().next()))
    }

    async fn create_keystore(&self, config: &KeystoreConfig) -> Result<KeystoreConfig> {
        let url = self.http.url(KEYSTORES_ROUTE, &[])?;
        self.http.post_json(url, config, None).await
    }

    async fn generate_key(
        &self,
        keystore: &str,
        kind: KeyKind,
        invocation: &Invocation,
    ) -> Result<KeyDescription> {
        let url = self.http.url(keystore, &["keys"])?;
        self.http
            .post_json(url, &json!({ "type": kind }), Some(invocation))
            .await
    }

    async fn describe_key(&self, key_id: &str) -> Result<KeyDescription> {
        let url = self.http.url(key_id, &[])?;
        self.http.get_json(self.http.request(Method::GET, url)).await
    }

    async fn derive_secret(
        &self,
        key_id: &str,
        public_key: &X25519PublicKey,
        invocation: &Invocation,
    ) -> Result<[u8; 32]> {
        let url = self.http.url(key_id, &["derive-secret"])?;
        let response: SecretResponse = self
            .http
            .post_json(url, &json!({ "publicKey": public_key }), Some(invocation))
            .await?;
        let bytes = hex::decode(&response.secret).map_err(|e| RemoteError::Encoding(e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| RemoteError::Encoding("derived secret must be 32 bytes".into()))
    }

    async fn sign(&self, key_id: &str, data: &[u8], invocation: &Invocation) -> Result<Vec<u8>> {
        let url = self.http.url(key_id, &["sign"])?;
        let response: SignatureResponse = self
            .http
            .post_json(url, &json!({ "data": hex::encode(data) }), Some(invocation))
            .await?;
        hex::decode(&response.signature).map_err(|e| RemoteError::Encoding(e.to_string()))
    }
}

enum KeyMaterial {
    KeyAgreement(KeyAgreementSecret),
    Hmac([u8; 32]),
}

struct StoredKey {
    keystore: String,
    material: KeyMaterial,
}

impl StoredKey {
    fn describe(&self, id: &str) -> KeyDescription {
        match &self.material {
            KeyMaterial::KeyAgreement(secret) => KeyDescription {
                id: id.to_string(),
                kind: KeyKind::KeyAgreement,
                public_key: Some(secret.public_key()),
            },
            KeyMaterial::Hmac(_) => KeyDescription {
                id: id.to_string(),
                kind: KeyKind::Hmac,
                public_key: None,
            },
        }
    }
}

/// In-process KMS for tests and local deployments.
///
/// HMAC keys are computed with a BLAKE3 keyed hash.
pub struct LocalKms {
    base_url: String,
    keystores: RwLock<BTreeMap<String, KeystoreConfig>>,
    keys: RwLock<BTreeMap<String, StoredKey>>,
}

impl LocalKms {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            keystores: RwLock::new(BTreeMap::new()),
            keys: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keystores created so far.
    pub fn keystore_count(&self) -> usize {
        self.keystores.read().map(|k| k.len()).unwrap_or(0)
    }

    fn poisoned() -> RemoteError {
        RemoteError::Transport("kms lock poisoned".into())
    }

    fn random_id() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("z{}", hex::encode(bytes))
    }

    /// Check an invocation against the controller of `keystore`.
    fn authorize(
        &self,
        keystore: &str,
        invocation: &Invocation,
        action: Action,
        target: &str,
    ) -> Result<()> {
        let keystores = self.keystores.read().map_err(|_| Self::poisoned())?;
        let config = keystores
            .get(keystore)
            .ok_or_else(|| RemoteError::NotFound(format!("keystore {}", keystore)))?;
        invocation
            .verify_rooted(&config.controller, action, target)
            .map_err(|e| RemoteError::PermissionDenied(e.to_string()))
    }

    /// Run `f` on a key after checking the invocation.
    fn with_key<T>(
        &self,
        key_id: &str,
        invocation: &Invocation,
        action: Action,
        f: impl FnOnce(&StoredKey) -> Result<T>,
    ) -> Result<T> {
        let keys = self.keys.read().map_err(|_| Self::poisoned())?;
        let key = keys
            .get(key_id)
            .ok_or_else(|| RemoteError::NotFound(format!("key {}", key_id)))?;
        self.authorize(&key.keystore, invocation, action, key_id)?;
        f(key)
    }
}

#[async_trait]
impl KeyManagement for LocalKms {
    async fn find_keystore(
        &self,
        controller: &str,
        reference_id: &str,
    ) -> Result<Option<KeystoreConfig>> {
        let keystores = self.keystores.read().map_err(|_| Self::poisoned())?;
        Ok(keystores
            .values()
            .find(|c| c.controller == controller && c.reference_id.as_deref() == Some(reference_id))
            .cloned())
    }

    async fn create_keystore(&self, config: &KeystoreConfig) -> Result<KeystoreConfig> {
        if config.sequence != 0 {
            return Err(RemoteError::InvalidArgument(
                "new keystore must have sequence 0".into(),
            ));
        }
        let mut keystores = self.keystores.write().map_err(|_| Self::poisoned())?;
        if let Some(reference_id) = &config.reference_id {
            let taken = keystores.values().any(|c| {
                c.controller == config.controller && c.reference_id.as_ref() == Some(reference_id)
            });
            if taken {
                return Err(RemoteError::Duplicate(format!(
                    "keystore {} exists for {}",
                    reference_id, config.controller
                )));
            }
        }

        let id = format!("{}/kms/keystores/{}", self.base_url, Self::random_id());
        let stored = KeystoreConfig {
            id: Some(id.clone()),
            ..config.clone()
        };
        keystores.insert(id.clone(), stored.clone());
        info!(keystore = %id, controller = %config.controller, "created keystore");
        Ok(stored)
    }

    async fn generate_key(
        &self,
        keystore: &str,
        kind: KeyKind,
        invocation: &Invocation,
    ) -> Result<KeyDescription> {
        self.authorize(keystore, invocation, Action::Write, keystore)?;

        let id = format!("{}/keys/{}", keystore, Self::random_id());
        let material = match kind {
            KeyKind::KeyAgreement => KeyMaterial::KeyAgreement(KeyAgreementSecret::generate()),
            KeyKind::Hmac => {
                let mut secret = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                KeyMaterial::Hmac(secret)
            }
        };
        let key = StoredKey {
            keystore: keystore.to_string(),
            material,
        };
        let description = key.describe(&id);
        self.keys
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(id.clone(), key);
        debug!(key = %id, kind = %kind, "generated key");
        Ok(description)
    }

    async fn describe_key(&self, key_id: &str) -> Result<KeyDescription> {
        let keys = self.keys.read().map_err(|_| Self::poisoned())?;
        keys.get(key_id)
            .map(|key| key.describe(key_id))
            .ok_or_else(|| RemoteError::NotFound(format!("key {}", key_id)))
    }

    async fn derive_secret(
        &self,
        key_id: &str,
        public_key: &X25519PublicKey,
        invocation: &Invocation,
    ) -> Result<[u8; 32]> {
        self.with_key(key_id, invocation, Action::DeriveSecret, |key| match &key.material {
            KeyMaterial::KeyAgreement(secret) => Ok(*secret.diffie_hellman(public_key).as_bytes()),
            KeyMaterial::Hmac(_) => Err(RemoteError::InvalidArgument(format!(
                "{} is not a key-agreement key",
                key_id
            ))),
        })
    }

    async fn sign(&self, key_id: &str, data: &[u8], invocation: &Invocation) -> Result<Vec<u8>> {
        self.with_key(key_id, invocation, Action::Sign, |key| match &key.material {
            KeyMaterial::Hmac(secret) => Ok(blake3::keyed_hash(secret, data).as_bytes().to_vec()),
            KeyMaterial::KeyAgreement(_) => Err(RemoteError::InvalidArgument(format!(
                "{} is not an hmac key",
                key_id
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use edv_access_core::{Capability, InvocationTarget, Keypair};
    use edv_access_perms::KeyAgreementSecret;

    use super::*;

    async fn keystore(kms: &LocalKms, controller: &Keypair) -> String {
        let config = KeystoreConfig::new(controller.principal(), Some("primary".into()));
        kms.create_keystore(&config).await.unwrap().id.unwrap()
    }

    fn invoke(keypair: &Keypair, keystore: &str, action: Action, target: &str) -> Invocation {
        let capability = Capability::root(
            InvocationTarget::new(keystore, "urn:kms:keystore"),
            keypair.principal(),
        );
        Invocation::sign(keypair, capability, action, target, 1).unwrap()
    }

    #[tokio::test]
    async fn test_find_or_create_keystore() {
        let kms = LocalKms::new("https://kms.example");
        let controller = Keypair::generate();

        assert!(kms.find_keystore(&controller.principal(), "primary").await.unwrap().is_none());
        let id = keystore(&kms, &controller).await;

        let found = kms.find_keystore(&controller.principal(), "primary").await.unwrap().unwrap();
        assert_eq!(found.id.as_deref(), Some(id.as_str()));
        assert_eq!(found.invoker, controller.principal());

        let again = KeystoreConfig::new(controller.principal(), Some("primary".into()));
        assert!(matches!(kms.create_keystore(&again).await, Err(RemoteError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_derive_secret_matches_sender_agreement() {
        let kms = LocalKms::new("https://kms.example");
        let controller = Keypair::generate();
        let ks = keystore(&kms, &controller).await;

        let key = kms
            .generate_key(&ks, KeyKind::KeyAgreement, &invoke(&controller, &ks, Action::Write, &ks))
            .await
            .unwrap();
        let recipient = key.public_key.unwrap();
        assert_eq!(kms.describe_key(&key.id).await.unwrap(), key);

        let sender = KeyAgreementSecret::generate();
        let expected = sender.diffie_hellman(&recipient);
        let derived = kms
            .derive_secret(
                &key.id,
                &sender.public_key(),
                &invoke(&controller, &ks, Action::DeriveSecret, &key.id),
            )
            .await
            .unwrap();
        assert_eq!(&derived, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_hmac_is_deterministic_and_gated() {
        let kms = LocalKms::new("https://kms.example");
        let controller = Keypair::generate();
        let stranger = Keypair::generate();
        let ks = keystore(&kms, &controller).await;

        let key = kms
            .generate_key(&ks, KeyKind::Hmac, &invoke(&controller, &ks, Action::Write, &ks))
            .await
            .unwrap();
        let inv = invoke(&controller, &ks, Action::Sign, &key.id);

        let a = kms.sign(&key.id, b"content.type", &inv).await.unwrap();
        let b = kms.sign(&key.id, b"content.type", &inv).await.unwrap();
        assert_eq!(a, b);

        let denied = kms
            .sign(&key.id, b"x", &invoke(&stranger, &ks, Action::Sign, &key.id))
            .await;
        assert!(matches!(denied, Err(RemoteError::PermissionDenied(_))));

        let wrong_action = kms
            .sign(&key.id, b"x", &invoke(&controller, &ks, Action::Read, &key.id))
            .await;
        assert!(matches!(wrong_action, Err(RemoteError::PermissionDenied(_))));
    }
}

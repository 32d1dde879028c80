//! Controller keys: the signing identity derived from an account seed and
//! the KMS-held keys it operates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use edv_access_core::{
    now_millis, Action, Capability, Invocation, InvocationTarget, KeyKind, KeyRef, Keypair,
    X25519PublicKey,
};
use edv_access_perms::SharedKey;
use edv_access_remote::{KeyManagement, KeystoreConfig};

use crate::error::{AccessError, Result};

/// Invocation target type of a keystore.
pub const KEYSTORE_TARGET_TYPE: &str = "urn:kms:keystore";

/// An account: the seed its controller key derives from and the ids of the
/// keys it seals and indexes documents with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub controller_key_seed: String,
    pub kak: KeyRef,
    pub hmac: KeyRef,
}

/// Derives controller identities and makes sure each has a keystore.
pub struct ControllerKeyProvider {
    kms: Arc<dyn KeyManagement>,
    keystore_reference_id: String,
}

impl ControllerKeyProvider {
    pub fn new(kms: Arc<dyn KeyManagement>, keystore_reference_id: impl Into<String>) -> Self {
        Self {
            kms,
            keystore_reference_id: keystore_reference_id.into(),
        }
    }

    /// Derive the controller of `account` from its seed.
    ///
    /// The key is a pure function of `(seed, account.id)`. Finding or creating
    /// the keystore is the only remote call; its errors are returned as they
    /// are.
    pub async fn derive_controller(&self, account: &Account) -> Result<ControllerIdentity> {
        self.derive(account.controller_key_seed.as_bytes(), &account.id)
            .await
    }

    /// Derive a controller from a raw secret and handle.
    pub async fn derive(&self, secret: &[u8], handle: &str) -> Result<ControllerIdentity> {
        let keypair = Keypair::derive(secret, handle);
        let keystore = self.ensure_keystore(&keypair.principal()).await?;
        Ok(ControllerIdentity {
            keypair: Arc::new(keypair),
            keystore,
            kms: self.kms.clone(),
        })
    }

    async fn ensure_keystore(&self, controller: &str) -> Result<String> {
        let existing = self
            .kms
            .find_keystore(controller, &self.keystore_reference_id)
            .await?;
        let config = match existing {
            Some(config) => config,
            None => {
                let config =
                    KeystoreConfig::new(controller, Some(self.keystore_reference_id.clone()));
                let created = self.kms.create_keystore(&config).await?;
                info!(controller = %controller, "created controller keystore");
                created
            }
        };
        config
            .id
            .ok_or_else(|| AccessError::InvalidArgument("keystore has no id".into()))
    }
}

/// A derived controller: signer plus handle on its keystore.
#[derive(Clone)]
pub struct ControllerIdentity {
    keypair: Arc<Keypair>,
    keystore: String,
    kms: Arc<dyn KeyManagement>,
}

impl ControllerIdentity {
    /// Principal id of the controller.
    pub fn id(&self) -> String {
        self.keypair.principal()
    }

    /// Signer for invocations and delegations.
    pub fn signer(&self) -> Arc<Keypair> {
        self.keypair.clone()
    }

    pub fn keystore(&self) -> &str {
        &self.keystore
    }

    /// The controller's root capability over its keystore.
    pub fn keystore_capability(&self) -> Capability {
        Capability::root(
            InvocationTarget::new(&self.keystore, KEYSTORE_TARGET_TYPE),
            self.id(),
        )
    }

    /// The controller's root capability over one of its keys, for
    /// delegating use of that key alone.
    pub fn key_capability(&self, key: &KeyRef) -> Capability {
        Capability::root(
            InvocationTarget::new(&key.id, key.kind.to_string()),
            self.id(),
        )
    }

    /// Generate a new key in the controller's keystore.
    pub async fn generate_key(&self, kind: KeyKind) -> Result<KeyRef> {
        let invocation = Invocation::sign(
            &self.keypair,
            self.keystore_capability(),
            Action::Write,
            &self.keystore,
            now_millis(),
        )?;
        let description = self
            .kms
            .generate_key(&self.keystore, kind, &invocation)
            .await?;
        info!(key = %description.id, kind = %kind, "generated controller key");
        Ok(KeyRef::new(description.id, kind))
    }

    /// Handle on a key-agreement key. Without `capability` the controller's
    /// keystore capability is invoked.
    pub fn key_agreement_key(
        &self,
        key: &KeyRef,
        capability: Option<Capability>,
    ) -> Result<KeyAgreementKey> {
        Ok(KeyAgreementKey {
            handle: self.handle(key, KeyKind::KeyAgreement, capability)?,
            public_key: OnceCell::new(),
        })
    }

    /// Handle on an HMAC key. Without `capability` the controller's keystore
    /// capability is invoked.
    pub fn hmac(&self, key: &KeyRef, capability: Option<Capability>) -> Result<Hmac> {
        Ok(Hmac {
            handle: self.handle(key, KeyKind::Hmac, capability)?,
        })
    }

    fn handle(
        &self,
        key: &KeyRef,
        expected: KeyKind,
        capability: Option<Capability>,
    ) -> Result<KeyHandle> {
        if key.kind != expected {
            return Err(AccessError::InvalidArgument(format!(
                "{} is a {}, expected {}",
                key.id, key.kind, expected
            )));
        }
        Ok(KeyHandle {
            id: key.id.clone(),
            capability: capability.unwrap_or_else(|| self.keystore_capability()),
            signer: self.keypair.clone(),
            kms: self.kms.clone(),
        })
    }
}

impl std::fmt::Debug for ControllerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerIdentity")
            .field("id", &self.id())
            .field("keystore", &self.keystore)
            .finish()
    }
}

/// A KMS key plus the capability used to operate it.
#[derive(Clone)]
struct KeyHandle {
    id: String,
    capability: Capability,
    signer: Arc<Keypair>,
    kms: Arc<dyn KeyManagement>,
}

impl KeyHandle {
    fn invoke(&self, action: Action) -> Result<Invocation> {
        Ok(Invocation::sign(
            &self.signer,
            self.capability.clone(),
            action,
            &self.id,
            now_millis(),
        )?)
    }
}

/// An X25519 key-agreement key held by the KMS.
pub struct KeyAgreementKey {
    handle: KeyHandle,
    public_key: OnceCell<X25519PublicKey>,
}

impl KeyAgreementKey {
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// The public half, fetched once from the key description.
    pub async fn public_key(&self) -> Result<X25519PublicKey> {
        let key = self
            .public_key
            .get_or_try_init(|| async {
                let description = self.handle.kms.describe_key(&self.handle.id).await?;
                description.public_key.ok_or_else(|| {
                    AccessError::InvalidArgument(format!(
                        "{} has no key-agreement public key",
                        self.handle.id
                    ))
                })
            })
            .await?;
        Ok(*key)
    }

    /// Agree a shared secret with `public_key` via `deriveSecret`.
    pub async fn derive_secret(&self, public_key: &X25519PublicKey) -> Result<SharedKey> {
        let invocation = self.handle.invoke(Action::DeriveSecret)?;
        let secret = self
            .handle
            .kms
            .derive_secret(&self.handle.id, public_key, &invocation)
            .await?;
        debug!(key = %self.handle.id, "derived shared secret");
        Ok(SharedKey::from_bytes(secret))
    }
}

/// A keyed hash held by the KMS, used to blind index terms.
pub struct Hmac {
    handle: KeyHandle,
}

impl Hmac {
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// MAC `data` via the KMS `sign` operation.
    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let invocation = self.handle.invoke(Action::Sign)?;
        Ok(self
            .handle
            .kms
            .sign(&self.handle.id, data, &invocation)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use edv_access_perms::KeyAgreementSecret;
    use edv_access_remote::LocalKms;

    use super::*;

    fn account(id: &str) -> Account {
        Account {
            id: id.into(),
            controller_key_seed: "correct horse battery staple".into(),
            kak: KeyRef::new("", KeyKind::KeyAgreement),
            hmac: KeyRef::new("", KeyKind::Hmac),
        }
    }

    fn provider() -> (Arc<LocalKms>, ControllerKeyProvider) {
        let kms = Arc::new(LocalKms::new("https://kms.example"));
        (kms.clone(), ControllerKeyProvider::new(kms, "primary"))
    }

    #[tokio::test]
    async fn test_derivation_is_deterministic_and_keystore_created_once() {
        let (kms, provider) = provider();

        let a = provider.derive_controller(&account("acct-1")).await.unwrap();
        let b = provider.derive_controller(&account("acct-1")).await.unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.keystore(), b.keystore());
        assert_eq!(kms.keystore_count(), 1);

        let other = provider.derive_controller(&account("acct-2")).await.unwrap();
        assert_ne!(other.id(), a.id());
        assert_eq!(kms.keystore_count(), 2);
    }

    #[tokio::test]
    async fn test_key_agreement_round_trip() {
        let (_, provider) = provider();
        let controller = provider.derive_controller(&account("acct-1")).await.unwrap();

        let key_ref = controller.generate_key(KeyKind::KeyAgreement).await.unwrap();
        let kak = controller.key_agreement_key(&key_ref, None).unwrap();

        let sender = KeyAgreementSecret::generate();
        let expected = sender.diffie_hellman(&kak.public_key().await.unwrap());
        let derived = kak.derive_secret(&sender.public_key()).await.unwrap();
        assert_eq!(derived.as_bytes(), expected.as_bytes());
    }

    #[tokio::test]
    async fn test_key_kind_checked() {
        let (_, provider) = provider();
        let controller = provider.derive_controller(&account("acct-1")).await.unwrap();
        let hmac_ref = controller.generate_key(KeyKind::Hmac).await.unwrap();

        assert!(controller.key_agreement_key(&hmac_ref, None).is_err());
        let hmac = controller.hmac(&hmac_ref, None).unwrap();
        assert_eq!(hmac.sign(b"x").await.unwrap(), hmac.sign(b"x").await.unwrap());
    }

    #[tokio::test]
    async fn test_delegated_key_capability_operates_only_that_key() {
        let (_, provider) = provider();
        let owner = provider.derive_controller(&account("owner")).await.unwrap();
        let member = provider.derive_controller(&account("member")).await.unwrap();
        let shared = owner.generate_key(KeyKind::Hmac).await.unwrap();
        let private = owner.generate_key(KeyKind::Hmac).await.unwrap();

        let capability = edv_access_perms::delegate(
            &edv_access_perms::DelegationRequest::new("edv-hmac", &[Action::Sign]),
            &owner.key_capability(&shared),
            &member.id(),
            &owner.signer(),
            now_millis(),
        )
        .unwrap();

        let as_member = member.hmac(&shared, Some(capability.clone())).unwrap();
        let as_owner = owner.hmac(&shared, None).unwrap();
        assert_eq!(as_member.sign(b"x").await.unwrap(), as_owner.sign(b"x").await.unwrap());

        let elsewhere = member.hmac(&private, Some(capability)).unwrap();
        assert!(elsewhere.sign(b"x").await.is_err());
        assert!(member.hmac(&shared, None).unwrap().sign(b"x").await.is_err());
    }
}

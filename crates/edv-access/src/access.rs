//! VaultAccess: wires the key provider, resolver and delegation engine to
//! the registry and KMS, and hands out document clients.

use std::sync::Arc;

use tracing::info;

use edv_access_core::{now_millis, Action, Capability, InvocationTarget, KeyKind, KeyRef};
use edv_access_perms::{delegate, reference, DelegationRequest};
use edv_access_remote::{CapabilityRegistry, KeyManagement};
use edv_access_store::EdvStore;

use crate::authorization::{request_capabilities, AuthorizationRequester};
use crate::client::{ClientParts, EncryptedDocumentClient, EDV_DOCUMENTS_TARGET_TYPE};
use crate::collection::Collection;
use crate::config::AccessConfig;
use crate::controller::{Account, ControllerIdentity, ControllerKeyProvider};
use crate::delegation::CapabilityDelegationEngine;
use crate::error::{AccessError, Result};
use crate::resolver::CapabilityResolver;

/// Reference ids of the capabilities a shared vault is opened with: its
/// documents collection and the owner's key-agreement and HMAC keys.
///
/// Every holder seals and blinds with the same two keys, so documents one
/// member writes are readable and findable by the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultReferences {
    pub documents: String,
    pub key_agreement_key: String,
    pub hmac: String,
}

impl VaultReferences {
    /// An instance's configuration vault: `<instance>-edv-configuration`,
    /// `<instance>-edv-kak` and `<instance>-edv-hmac`.
    pub fn instance(instance_id: &str) -> Self {
        Self {
            documents: format!("{}-edv-configuration", instance_id),
            key_agreement_key: format!("{}-edv-kak", instance_id),
            hmac: format!("{}-edv-hmac", instance_id),
        }
    }

    /// The issuer's credential store.
    pub fn credentials() -> Self {
        Self {
            documents: reference::CREDENTIAL_DOCUMENTS.to_string(),
            key_agreement_key: reference::CREDENTIAL_KAK.to_string(),
            hmac: reference::CREDENTIAL_HMAC.to_string(),
        }
    }

    fn all(&self) -> [&str; 3] {
        [&self.documents, &self.key_agreement_key, &self.hmac]
    }
}

/// Entry point to capability-scoped vault access.
pub struct VaultAccess {
    config: AccessConfig,
    keys: ControllerKeyProvider,
    resolver: CapabilityResolver,
    delegation: CapabilityDelegationEngine,
}

impl VaultAccess {
    pub fn new(
        config: AccessConfig,
        kms: Arc<dyn KeyManagement>,
        registry: Arc<dyn CapabilityRegistry>,
    ) -> Self {
        Self {
            keys: ControllerKeyProvider::new(kms, config.keystore_reference_id.clone()),
            resolver: CapabilityResolver::new(registry.clone(), config.concurrency()),
            delegation: CapabilityDelegationEngine::new(registry),
            config,
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn keys(&self) -> &ControllerKeyProvider {
        &self.keys
    }

    pub fn resolver(&self) -> &CapabilityResolver {
        &self.resolver
    }

    pub fn delegation(&self) -> &CapabilityDelegationEngine {
        &self.delegation
    }

    /// Provision an account: derive its controller and generate the
    /// key-agreement and HMAC keys its documents will use.
    pub async fn create_account(&self, id: &str, seed: &str) -> Result<Account> {
        let controller = self.keys.derive(seed.as_bytes(), id).await?;
        let kak = controller.generate_key(KeyKind::KeyAgreement).await?;
        let hmac = controller.generate_key(KeyKind::Hmac).await?;
        info!(account = %id, controller = %controller.id(), "provisioned account");
        Ok(Account {
            id: id.to_string(),
            controller_key_seed: seed.to_string(),
            kak,
            hmac,
        })
    }

    pub async fn controller(&self, account: &Account) -> Result<ControllerIdentity> {
        self.keys.derive_controller(account).await
    }

    /// A document client for `store` acting as `account`.
    ///
    /// Without `capability` the account's controller invokes its root
    /// capability over the vault, which only works on vaults it controls.
    pub async fn client(
        &self,
        store: Arc<dyn EdvStore>,
        account: &Account,
        capability: Option<Capability>,
    ) -> Result<EncryptedDocumentClient> {
        let controller = self.controller(account).await?;
        self.client_for(&controller, store, account, capability)
    }

    fn client_for(
        &self,
        controller: &ControllerIdentity,
        store: Arc<dyn EdvStore>,
        account: &Account,
        capability: Option<Capability>,
    ) -> Result<EncryptedDocumentClient> {
        let capability = capability.unwrap_or_else(|| {
            Capability::root(
                InvocationTarget::new(&store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
                controller.id(),
            )
        });
        Ok(EncryptedDocumentClient::new(ClientParts {
            key_agreement_key: controller.key_agreement_key(&account.kak, None)?,
            hmac: controller.hmac(&account.hmac, None)?,
            signer: controller.signer(),
            capability,
            store,
        }))
    }

    /// A typed collection over `store`.
    pub async fn collection(
        &self,
        content_type: &str,
        store: Arc<dyn EdvStore>,
        account: &Account,
        capability: Option<Capability>,
    ) -> Result<Collection> {
        let client = self.client(store, account, capability).await?;
        Collection::new(content_type, Arc::new(client), self.config.retry.clone())
    }

    /// A typed collection over an instance's configuration vault, using the
    /// instance capabilities held by the account.
    pub async fn open_collection(
        &self,
        content_type: &str,
        instance_id: &str,
        store: Arc<dyn EdvStore>,
        account: &Account,
    ) -> Result<Collection> {
        self.open_shared_collection(
            content_type,
            store,
            account,
            &VaultReferences::instance(instance_id),
        )
        .await
    }

    /// A typed collection over a vault shared with the account.
    ///
    /// Documents are sealed and blinded with the keys the `references`
    /// capabilities point at, not with the account's own keys.
    pub async fn open_shared_collection(
        &self,
        content_type: &str,
        store: Arc<dyn EdvStore>,
        account: &Account,
        references: &VaultReferences,
    ) -> Result<Collection> {
        let controller = self.controller(account).await?;
        let client = self.shared_client(&controller, store, references).await?;
        Collection::new(content_type, Arc::new(client), self.config.retry.clone())
    }

    async fn shared_client(
        &self,
        controller: &ControllerIdentity,
        store: Arc<dyn EdvStore>,
        references: &VaultReferences,
    ) -> Result<EncryptedDocumentClient> {
        let resolved = self
            .resolver
            .require_all(&references.all(), &controller.id())
            .await?;
        let [documents, kak, hmac]: [Capability; 3] = resolved
            .try_into()
            .map_err(|_| AccessError::InvalidArgument("expected three vault capabilities".into()))?;

        let kak_ref = KeyRef::new(kak.invocation_target.id.clone(), KeyKind::KeyAgreement);
        let hmac_ref = KeyRef::new(hmac.invocation_target.id.clone(), KeyKind::Hmac);
        Ok(EncryptedDocumentClient::new(ClientParts {
            key_agreement_key: controller.key_agreement_key(&kak_ref, Some(kak))?,
            hmac: controller.hmac(&hmac_ref, Some(hmac))?,
            signer: controller.signer(),
            capability: documents,
            store,
        }))
    }

    /// Share a vault `owner` controls with `invoker`.
    ///
    /// Delegates the documents collection with `actions`, plus use of the
    /// owner's key-agreement and HMAC keys, under the reference ids in
    /// `references`. The capabilities are registered all-or-none.
    pub async fn share_vault(
        &self,
        owner: &Account,
        store: &dyn EdvStore,
        references: &VaultReferences,
        invoker: &str,
        actions: &[Action],
    ) -> Result<Vec<Capability>> {
        let controller = self.controller(owner).await?;
        let vault_root = Capability::root(
            InvocationTarget::new(&store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
            controller.id(),
        );
        let grants = [
            (DelegationRequest::new(&references.documents, actions), vault_root),
            (
                DelegationRequest::new(
                    &references.key_agreement_key,
                    &[Action::DeriveSecret, Action::Sign],
                ),
                controller.key_capability(&owner.kak),
            ),
            (
                DelegationRequest::new(&references.hmac, &[Action::Sign]),
                controller.key_capability(&owner.hmac),
            ),
        ];

        let signer = controller.signer();
        let created = now_millis();
        let delegated = grants
            .iter()
            .map(|(request, parent)| delegate(request, parent, invoker, &signer, created))
            .collect::<edv_access_perms::Result<Vec<_>>>()?;
        self.delegation.register(&delegated).await?;
        info!(vault = %store.vault().id, invoker = %invoker, "shared vault");
        Ok(delegated)
    }

    /// Ask the user agent for access to an instance and register what it grants.
    pub async fn request_instance_access(
        &self,
        requester: &dyn AuthorizationRequester,
        instance_id: &str,
        account: &Account,
    ) -> Result<Option<Vec<Capability>>> {
        let controller = self.controller(account).await?;
        let Some(granted) = request_capabilities(requester, instance_id, &controller.id()).await?
        else {
            return Ok(None);
        };
        self.delegation.register(&granted).await?;
        Ok(Some(granted))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use edv_access_store::{MemoryEdv, VaultInfo};
    use serde_json::json;

    use super::*;
    use crate::authorization::{AuthorizationQuery, Presentation};
    use crate::collection::Lookup;
    use crate::error::ErrorKind;
    use crate::testing::{access, vault_for, Fixture};

    struct Grantor {
        capabilities: Vec<Capability>,
    }

    #[async_trait]
    impl AuthorizationRequester for Grantor {
        async fn request_authorization(&self, _: &AuthorizationQuery) -> Result<Option<Presentation>> {
            Ok(Some(Presentation {
                holder: None,
                capability: self.capabilities.clone(),
            }))
        }
    }

    async fn member(fx: &Fixture, id: &str) -> (Account, String) {
        let account = fx.access.create_account(id, &format!("{} secret", id)).await.unwrap();
        let principal = fx.access.controller(&account).await.unwrap().id();
        (account, principal)
    }

    /// The admin's own collection over the fixture vault.
    async fn admin_users(fx: &Fixture) -> Collection {
        fx.access
            .collection("User", fx.store.clone(), &fx.account, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_collection_requires_capability() {
        let fx = Fixture::new().await;
        let (user, _) = member(&fx, "user-1").await;

        let err = fx
            .access
            .open_collection("User", "inst-1", fx.store.clone(), &user)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_granted_instance_access_opens_vault() {
        let fx = Fixture::new().await;
        let (user, user_id) = member(&fx, "user-1").await;
        let references = VaultReferences::instance("inst-1");

        let signer = fx.controller.signer();
        let root = Capability::root(
            InvocationTarget::new(&fx.store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
            fx.controller.id(),
        );
        let capabilities = [
            (references.documents.as_str(), vec![Action::Read, Action::Write], root),
            (
                references.key_agreement_key.as_str(),
                vec![Action::DeriveSecret, Action::Sign],
                fx.controller.key_capability(&fx.account.kak),
            ),
            (
                references.hmac.as_str(),
                vec![Action::Sign],
                fx.controller.key_capability(&fx.account.hmac),
            ),
        ]
        .iter()
        .map(|(reference_id, actions, parent)| {
            delegate(
                &DelegationRequest::new(reference_id, actions),
                parent,
                &user_id,
                &signer,
                now_millis(),
            )
            .unwrap()
        })
        .collect();

        let granted = fx
            .access
            .request_instance_access(&Grantor { capabilities }, "inst-1", &user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(granted.len(), 3);

        let users = fx
            .access
            .open_collection("User", "inst-1", fx.store.clone(), &user)
            .await
            .unwrap();
        users.create(json!({"id": "u-1", "type": "User"}), None).await.unwrap();
        assert!(admin_users(&fx).await.get(&Lookup::id("u-1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shared_vault_members_see_each_others_items() {
        let fx = Fixture::new().await;
        let (user, user_id) = member(&fx, "user-1").await;
        let references = VaultReferences::instance("inst-1");
        let shared = fx
            .access
            .share_vault(
                &fx.account,
                fx.store.as_ref(),
                &references,
                &user_id,
                &[Action::Read, Action::Write],
            )
            .await
            .unwrap();
        assert_eq!(shared.len(), 3);

        let admin = admin_users(&fx).await;
        admin
            .create(json!({"id": "u-1", "type": "User", "name": "Ada"}), None)
            .await
            .unwrap();

        let users = fx
            .access
            .open_collection("User", "inst-1", fx.store.clone(), &user)
            .await
            .unwrap();
        let found = users.get(&Lookup::id("u-1")).await.unwrap().unwrap();
        assert_eq!(found.content["name"], json!("Ada"));
        assert_eq!(users.get_all().await.unwrap().len(), 1);

        let err = users
            .create(json!({"id": "u-1", "type": "User"}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);

        users.create(json!({"id": "u-2", "type": "User"}), None).await.unwrap();
        assert!(admin.get(&Lookup::id("u-2")).await.unwrap().is_some());
        assert_eq!(admin.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_documents_capability_alone_is_denied() {
        let fx = Fixture::new().await;
        let (user, user_id) = member(&fx, "user-1").await;
        let root = Capability::root(
            InvocationTarget::new(&fx.store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
            fx.controller.id(),
        );
        let documents = delegate(
            &DelegationRequest::new("inst-1-edv-configuration", &[Action::Read, Action::Write]),
            &root,
            &user_id,
            &fx.controller.signer(),
            now_millis(),
        )
        .unwrap();
        fx.access.delegation().register(&[documents]).await.unwrap();

        let err = fx
            .access
            .open_collection("User", "inst-1", fx.store.clone(), &user)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("inst-1-edv-kak"));
    }

    #[tokio::test]
    async fn test_credential_store_shared_with_read_role() {
        let fx = Fixture::new().await;
        let (user, user_id) = member(&fx, "user-1").await;
        let references = VaultReferences::credentials();
        let credentials: Arc<dyn EdvStore> =
            Arc::new(MemoryEdv::new(VaultInfo::new("z-credentials", fx.controller.id(), "https://edv.example")));

        let mut grants = edv_access_perms::InstanceGrants::new();
        grants.insert(
            Capability::root(
                InvocationTarget::new(&credentials.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
                fx.controller.id(),
            )
            .with_reference_id(&references.documents),
        );
        grants.insert(fx.controller.key_capability(&fx.account.kak).with_reference_id(&references.key_agreement_key));
        grants.insert(fx.controller.key_capability(&fx.account.hmac).with_reference_id(&references.hmac));

        let mut record = edv_access_perms::UserRecord::new(
            "user-1",
            &user_id,
            edv_access_perms::RoleSet::of(&[edv_access_perms::Role::Read]),
        );
        fx.access
            .delegation()
            .delegate(&mut record, &grants, &fx.controller.signer())
            .await
            .unwrap();

        let issued = fx
            .access
            .collection("VerifiableCredential", credentials.clone(), &fx.account, None)
            .await
            .unwrap();
        issued
            .create(json!({"id": "urn:uuid:c-1", "type": "VerifiableCredential"}), None)
            .await
            .unwrap();

        let read = fx
            .access
            .open_shared_collection("VerifiableCredential", credentials, &user, &references)
            .await
            .unwrap();
        assert!(read.get(&Lookup::id("urn:uuid:c-1")).await.unwrap().is_some());
        let err = read
            .create(json!({"id": "urn:uuid:c-2", "type": "VerifiableCredential"}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_foreign_vault_denied_without_capability() {
        let access = access();
        let owner = access.create_account("owner", "owner secret").await.unwrap();
        let stranger = access.create_account("stranger", "stranger secret").await.unwrap();
        let owner_id = access.controller(&owner).await.unwrap().id();
        let store: Arc<dyn EdvStore> = Arc::new(MemoryEdv::new(vault_for(&owner_id)));

        let users = access.collection("User", store, &stranger, None).await.unwrap();
        let err = users
            .create(json!({"id": "u-1", "type": "User"}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}

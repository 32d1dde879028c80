//! In-crate test fixture: one provisioned account over a local KMS, an
//! in-memory registry and an in-memory vault it controls.

use std::sync::Arc;

use edv_access_core::{
    now_millis, Action, Capability, DocumentId, EncryptedDocument, Invocation, InvocationTarget,
    KeyRef,
};
use edv_access_remote::{LocalKms, MemoryRegistry};
use edv_access_store::{document_target, EdvStore, MemoryEdv, VaultInfo};

use crate::access::VaultAccess;
use crate::client::{ClientParts, EncryptedDocumentClient, EDV_DOCUMENTS_TARGET_TYPE};
use crate::collection::DEFAULT_INDEXES;
use crate::config::AccessConfig;
use crate::controller::{Account, ControllerIdentity};

pub const KMS_URL: &str = "https://kms.example";
pub const EDV_URL: &str = "https://edv.example";

pub fn access() -> VaultAccess {
    VaultAccess::new(
        AccessConfig::default(),
        Arc::new(LocalKms::new(KMS_URL)),
        Arc::new(MemoryRegistry::new()),
    )
}

pub fn vault_for(controller: &str) -> VaultInfo {
    VaultInfo::new("z-vault", controller, EDV_URL)
}

pub struct Fixture {
    pub access: VaultAccess,
    pub account: Account,
    pub controller: ControllerIdentity,
    pub store: Arc<MemoryEdv>,
    pub client: Arc<EncryptedDocumentClient>,
}

pub async fn fixture() -> Fixture {
    Fixture::new().await
}

impl Fixture {
    pub async fn new() -> Self {
        let access = access();
        let account = access.create_account("acct-1", "fixture secret").await.unwrap();
        let controller = access.controller(&account).await.unwrap();
        let store = Arc::new(MemoryEdv::new(vault_for(&controller.id())));

        let client = access.client(store.clone(), &account, None).await.unwrap();
        for (attribute, unique) in DEFAULT_INDEXES {
            client.ensure_index(attribute, unique).unwrap();
        }

        Self {
            access,
            account,
            controller,
            store,
            client: Arc::new(client),
        }
    }

    fn root(&self) -> Capability {
        Capability::root(
            InvocationTarget::new(&self.store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
            self.controller.id(),
        )
    }

    /// The document exactly as the vault holds it.
    pub async fn stored(&self, id: &DocumentId) -> EncryptedDocument {
        let target = document_target(&self.store.vault().documents, id);
        let invocation = Invocation::sign(
            &self.controller.signer(),
            self.root(),
            Action::Read,
            &target,
            now_millis(),
        )
        .unwrap();
        self.store.get(id, &invocation).await.unwrap().unwrap()
    }

    /// A client on the same vault that seals to a different key-agreement key.
    pub fn client_with_kak(&self, kak: &KeyRef) -> EncryptedDocumentClient {
        let client = EncryptedDocumentClient::new(ClientParts {
            store: self.store.clone(),
            key_agreement_key: self.controller.key_agreement_key(kak, None).unwrap(),
            hmac: self.controller.hmac(&self.account.hmac, None).unwrap(),
            capability: self.root(),
            signer: self.controller.signer(),
        });
        for (attribute, unique) in DEFAULT_INDEXES {
            client.ensure_index(attribute, unique).unwrap();
        }
        client
    }
}

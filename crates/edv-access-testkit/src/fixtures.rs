//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: an instance vault provisioned
//! over in-memory backends, and a store wrapper that injects conflicts.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use edv_access::perms::{reference, InstanceGrants};
use edv_access::remote::{LocalKms, MemoryRegistry};
use edv_access::store::{EdvStore, MemoryEdv, Result as StoreResult, StoreError, VaultInfo};
use edv_access::{
    AccessConfig, Account, ControllerIdentity, RetryPolicy, VaultAccess, VaultReferences,
    EDV_DOCUMENTS_TARGET_TYPE,
};
use edv_access_core::{
    now_millis, Action, BlindedQuery, Capability, DocumentId, EncryptedDocument, Invocation,
    InvocationTarget, Keypair,
};

pub const KMS_URL: &str = "https://kms.example";
pub const EDV_URL: &str = "https://edv.example";
pub const INSTANCE_ID: &str = "inst-1";

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A retry policy with short pauses, for tests that provoke conflicts.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        ..RetryPolicy::default()
    }
}

/// Store wrapper that fails the next `n` updates with a conflict and
/// counts every call that reaches it.
pub struct FlakyStore {
    inner: Arc<dyn EdvStore>,
    pending_conflicts: AtomicU32,
    update_delay_ms: AtomicU64,
    calls: AtomicUsize,
    reads: AtomicUsize,
    update_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn EdvStore>) -> Self {
        Self {
            inner,
            pending_conflicts: AtomicU32::new(0),
            update_delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            update_attempts: AtomicUsize::new(0),
        }
    }

    /// Delay every following update by `delay` before it reaches the
    /// inner store.
    pub fn delay_updates(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.update_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Fail the next `count` updates with `Conflict`.
    pub fn conflict_next(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Every call of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls to `get`.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Calls to `update`, including injected conflicts.
    pub fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    /// Zero every counter.
    pub fn reset_counts(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.reads.store(0, Ordering::SeqCst);
        self.update_attempts.store(0, Ordering::SeqCst);
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EdvStore for FlakyStore {
    fn vault(&self) -> &VaultInfo {
        self.inner.vault()
    }

    async fn insert(&self, doc: &EncryptedDocument, invocation: &Invocation) -> StoreResult<()> {
        self.count();
        self.inner.insert(doc, invocation).await
    }

    async fn update(&self, doc: &EncryptedDocument, invocation: &Invocation) -> StoreResult<()> {
        self.count();
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.update_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.take_conflict() {
            return Err(StoreError::Conflict(format!(
                "document {} changed concurrently",
                doc.id
            )));
        }
        self.inner.update(doc, invocation).await
    }

    async fn get(
        &self,
        id: &DocumentId,
        invocation: &Invocation,
    ) -> StoreResult<Option<EncryptedDocument>> {
        self.count();
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id, invocation).await
    }

    async fn find(
        &self,
        query: &BlindedQuery,
        invocation: &Invocation,
    ) -> StoreResult<Vec<EncryptedDocument>> {
        self.count();
        self.inner.find(query, invocation).await
    }

    async fn delete(&self, id: &DocumentId, invocation: &Invocation) -> StoreResult<bool> {
        self.count();
        self.inner.delete(id, invocation).await
    }
}

/// An issuer instance provisioned over in-memory backends.
///
/// The admin account controls the instance's configuration vault; other
/// accounts reach it through delegated capabilities.
pub struct InstanceFixture {
    pub access: VaultAccess,
    pub kms: Arc<LocalKms>,
    pub registry: Arc<MemoryRegistry>,
    pub admin: Account,
    pub controller: ControllerIdentity,
    pub store: Arc<FlakyStore>,
}

impl InstanceFixture {
    pub async fn new() -> Self {
        Self::with_config(AccessConfig {
            retry: fast_retry(),
            ..AccessConfig::default()
        })
        .await
    }

    pub async fn with_config(config: AccessConfig) -> Self {
        Self::with_store(config, |vault| -> Arc<dyn EdvStore> {
            Arc::new(MemoryEdv::new(vault))
        })
        .await
    }

    /// Provision over a vault built by `open` for the admin's controller.
    pub async fn with_store<F>(config: AccessConfig, open: F) -> Self
    where
        F: FnOnce(VaultInfo) -> Arc<dyn EdvStore>,
    {
        init_tracing();
        let kms = Arc::new(LocalKms::new(KMS_URL));
        let registry = Arc::new(MemoryRegistry::new());
        let access = VaultAccess::new(config, kms.clone(), registry.clone());

        let admin = access
            .create_account("admin-1", "admin secret")
            .await
            .expect("provision admin");
        let controller = access.controller(&admin).await.expect("derive admin");
        let vault = VaultInfo::new(format!("{}-configuration", INSTANCE_ID), controller.id(), EDV_URL);
        let store = Arc::new(FlakyStore::new(open(vault)));

        Self {
            access,
            kms,
            registry,
            admin,
            controller,
            store,
        }
    }

    /// The admin's root capability over the configuration vault.
    pub fn root(&self) -> Capability {
        Capability::root(
            InvocationTarget::new(&self.store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
            self.controller.id(),
        )
    }

    /// Provision a member account and share the configuration vault with
    /// it: `actions` on the documents plus use of the admin's vault keys.
    ///
    /// Returns the account and its documents capability.
    pub async fn member(&self, id: &str, actions: &[Action]) -> (Account, Capability) {
        let account = self
            .access
            .create_account(id, &format!("{} secret", id))
            .await
            .expect("provision member");
        let member = self.access.controller(&account).await.expect("derive member");
        let mut shared = self
            .access
            .share_vault(
                &self.admin,
                self.store.as_ref(),
                &VaultReferences::instance(INSTANCE_ID),
                &member.id(),
                actions,
            )
            .await
            .expect("share configuration vault");
        (account, shared.remove(0))
    }

    /// Raw stored form of a document, read with the admin's root capability.
    pub async fn stored(&self, id: &DocumentId) -> Option<EncryptedDocument> {
        let target = format!("{}/{}", self.store.vault().documents, id);
        let invocation = Invocation::sign(
            &self.controller.signer(),
            self.root(),
            Action::Read,
            &target,
            now_millis(),
        )
        .expect("sign read");
        self.store.get(id, &invocation).await.expect("read stored")
    }
}

/// Root capabilities for every reference id delegation may ask for,
/// controlled by `grantor`.
pub fn instance_grants(grantor: &Keypair) -> InstanceGrants {
    [
        reference::PROFILE_INVOCATION_KEY,
        reference::USER_DOCUMENTS,
        reference::USER_REVOCATIONS,
        reference::CREDENTIAL_DOCUMENTS,
        reference::CREDENTIAL_HMAC,
        reference::CREDENTIAL_KAK,
        reference::CREDENTIAL_REVOCATIONS,
        reference::KEY_ISSUANCE,
        reference::KEY_ISSUANCE_REVOCATIONS,
    ]
    .into_iter()
    .map(|reference_id| {
        Capability::root(
            InvocationTarget::new(format!("{}/{}", KMS_URL, reference_id), "urn:test:resource"),
            grantor.principal(),
        )
        .with_reference_id(reference_id)
    })
    .collect()
}

/// `{"id": id, "type": content_type}` plus `extra` fields.
pub fn item(id: &str, content_type: &str, extra: Value) -> Value {
    let mut item = serde_json::json!({"id": id, "type": content_type});
    if let (Some(item), Value::Object(extra)) = (item.as_object_mut(), extra) {
        item.extend(extra);
    }
    item
}

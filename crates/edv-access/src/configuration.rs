//! Issuer registration and the encrypted configuration document each
//! registered issuer keeps in the service's configuration vault.
//!
//! A registration grants the registering account a capability with
//! reference id `configuration` over that vault. The configuration document
//! is keyed by the issuer id and sealed to the account's own keys.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use edv_access_core::{Document, DocumentId};
use edv_access_remote::{IssueRequest, IssuerService, Registration, RegistrationService};
use edv_access_store::EdvStore;

use crate::access::VaultAccess;
use crate::client::EncryptedDocumentClient;
use crate::controller::Account;
use crate::error::{AccessError, ErrorKind, Result};

/// Reference id of the capability a registration grants over the
/// configuration vault.
pub const CONFIGURATION_REFERENCE_ID: &str = "configuration";

/// `content.type` of a configuration document.
pub const CONFIGURATION_TYPE: &str = "IssuerConfiguration";

/// The content of a configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerConfiguration {
    /// The issuer id, repeated from `issuer.id`.
    pub id: String,
    #[serde(rename = "type")]
    pub config_type: String,
    /// The credential subject of the registering credential.
    pub issuer: Value,
    #[serde(default)]
    pub flows: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IssuerConfiguration {
    /// A configuration with no flows for `issuer`, which must carry an `id`.
    pub fn new(issuer: Value) -> Result<Self> {
        let id = issuer
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AccessError::InvalidArgument("\"issuer.id\" is required".into()))?
            .to_string();
        Ok(Self {
            id,
            config_type: CONFIGURATION_TYPE.to_string(),
            issuer,
            flows: Vec::new(),
            extra: Map::new(),
        })
    }

    fn from_content(content: Value) -> Result<Self> {
        serde_json::from_value(content)
            .map_err(|e| AccessError::InvalidArgument(format!("issuer configuration: {}", e)))
    }

    fn to_content(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| AccessError::InvalidArgument(format!("issuer configuration: {}", e)))
    }
}

/// Registers issuers and manages their configuration documents.
pub struct IssuerConfigurations<'a> {
    access: &'a VaultAccess,
    registrations: RegistrationService,
    issuer: IssuerService,
    store: Arc<dyn EdvStore>,
}

impl<'a> IssuerConfigurations<'a> {
    /// `store` is the configuration vault registrations grant access to.
    pub fn new(
        access: &'a VaultAccess,
        registrations: RegistrationService,
        issuer: IssuerService,
        store: Arc<dyn EdvStore>,
    ) -> Self {
        Self {
            access,
            registrations,
            issuer,
            store,
        }
    }

    /// Register the subject of the presentation's first credential as an
    /// issuer controlled by `account`, then create its configuration.
    pub async fn register_issuer(&self, account: &Account, presentation: &Value) -> Result<IssuerConfiguration> {
        let credential = presentation
            .get("verifiableCredential")
            .and_then(|credentials| match credentials {
                Value::Array(items) => items.first(),
                single => Some(single),
            })
            .ok_or_else(|| {
                AccessError::InvalidArgument("presentation carries no credential".into())
            })?;
        let registration = self.registrations.create(&account.id, presentation).await?;
        let configuration = self.create(account, credential, &registration).await?;
        info!(issuer = %configuration.id, account = %account.id, "registered issuer");
        Ok(configuration)
    }

    /// Remove the issuer's configuration, then its registration.
    ///
    /// Returns whether the registration existed.
    pub async fn unregister_issuer(&self, account: &Account, issuer: &str) -> Result<bool> {
        self.remove(account, issuer).await?;
        let removed = self.registrations.remove(issuer).await?;
        info!(issuer = %issuer, removed, "unregistered issuer");
        Ok(removed)
    }

    /// Write a fresh configuration for the subject of `credential`.
    ///
    /// An existing configuration document is overwritten at its next
    /// sequence; otherwise one is inserted.
    pub async fn create(
        &self,
        account: &Account,
        credential: &Value,
        registration: &Registration,
    ) -> Result<IssuerConfiguration> {
        let issuer = credential.get("credentialSubject").cloned().ok_or_else(|| {
            AccessError::InvalidArgument("credential has no \"credentialSubject\"".into())
        })?;
        let configuration = IssuerConfiguration::new(issuer)?;
        let client = self.client(account, registration).await?;
        let id = DocumentId::new(&configuration.id);

        let current = match client.read(&id).await {
            Ok(doc) => doc,
            Err(e) if e.kind() == ErrorKind::NotFound => Document::new(id, Value::Null),
            Err(e) => return Err(e),
        };
        client
            .write(&Document {
                content: configuration.to_content()?,
                ..current
            })
            .await?;
        Ok(configuration)
    }

    pub async fn get(&self, account: &Account, issuer: &str) -> Result<IssuerConfiguration> {
        let client = self.client_for(account, issuer).await?;
        let doc = client.read(&DocumentId::new(issuer)).await?;
        IssuerConfiguration::from_content(doc.content)
    }

    /// Every configuration the issuer service lists.
    pub async fn get_all(&self) -> Result<Vec<IssuerConfiguration>> {
        self.issuer
            .configurations()
            .await?
            .into_iter()
            .map(IssuerConfiguration::from_content)
            .collect()
    }

    /// Replace the issuer's configuration content.
    pub async fn update(
        &self,
        account: &Account,
        issuer: &str,
        configuration: &IssuerConfiguration,
    ) -> Result<IssuerConfiguration> {
        let client = self.client_for(account, issuer).await?;
        let current = client.read(&DocumentId::new(issuer)).await?;
        let written = client
            .write(&Document {
                content: configuration.to_content()?,
                ..current
            })
            .await?;
        IssuerConfiguration::from_content(written.content)
    }

    /// Delete the issuer's configuration. Returns `false` if there was none.
    pub async fn remove(&self, account: &Account, issuer: &str) -> Result<bool> {
        let client = self.client_for(account, issuer).await?;
        client.delete(&DocumentId::new(issuer)).await
    }

    /// Issue credentials through one of the issuer's flows.
    pub async fn issue(&self, request: &IssueRequest) -> Result<Value> {
        Ok(self.issuer.issue(request).await?)
    }

    async fn client_for(&self, account: &Account, issuer: &str) -> Result<EncryptedDocumentClient> {
        let registration = self.registrations.get(issuer).await?;
        self.client(account, &registration).await
    }

    async fn client(&self, account: &Account, registration: &Registration) -> Result<EncryptedDocumentClient> {
        let capability = registration
            .capability(CONFIGURATION_REFERENCE_ID)
            .cloned()
            .ok_or_else(|| {
                AccessError::PermissionDenied(format!(
                    "registration of {} grants no {} capability",
                    registration.issuer.as_deref().unwrap_or(&registration.controller),
                    CONFIGURATION_REFERENCE_ID
                ))
            })?;
        self.access
            .client(self.store.clone(), account, Some(capability))
            .await
    }
}

#[cfg(test)]
mod tests {
    use edv_access_core::{now_millis, Action, Capability, InvocationTarget, Keypair};
    use edv_access_perms::{delegate, DelegationRequest};
    use edv_access_remote::ServiceConfig;
    use edv_access_store::{MemoryEdv, VaultInfo};
    use serde_json::json;

    use super::*;
    use crate::client::EDV_DOCUMENTS_TARGET_TYPE;
    use crate::testing::{access, EDV_URL};

    struct Setup {
        access: VaultAccess,
        account: Account,
        store: Arc<MemoryEdv>,
        registration: Registration,
    }

    /// A configuration vault owned by the issuer service, and a registration
    /// granting `actions` on it to a fresh account.
    async fn setup(actions: &[Action]) -> Setup {
        let access = access();
        let account = access.create_account("acct-1", "issuer secret").await.unwrap();
        let controller = access.controller(&account).await.unwrap();
        let service = Keypair::generate();
        let store = Arc::new(MemoryEdv::new(VaultInfo::new("z-config", service.principal(), EDV_URL)));

        let root = Capability::root(
            InvocationTarget::new(&store.vault().documents, EDV_DOCUMENTS_TARGET_TYPE),
            service.principal(),
        );
        let capability = delegate(
            &DelegationRequest::new(CONFIGURATION_REFERENCE_ID, actions),
            &root,
            &controller.id(),
            &service,
            now_millis(),
        )
        .unwrap();
        let registration = Registration {
            issuer: Some("did:key:z1".into()),
            controller: controller.id(),
            capability: vec![capability],
            extra: Map::new(),
        };
        Setup {
            access,
            account,
            store,
            registration,
        }
    }

    fn configurations<'a>(access: &'a VaultAccess, store: Arc<MemoryEdv>) -> IssuerConfigurations<'a> {
        let services = ServiceConfig::new("http://127.0.0.1:9");
        IssuerConfigurations::new(
            access,
            RegistrationService::new(&services).unwrap(),
            IssuerService::new(&services).unwrap(),
            store,
        )
    }

    fn credential() -> Value {
        json!({
            "type": ["VerifiableCredential"],
            "credentialSubject": {"id": "did:key:z1", "name": "Registrar"}
        })
    }

    #[test]
    fn test_configuration_requires_issuer_id() {
        let configuration = IssuerConfiguration::new(json!({"id": "did:key:z1"})).unwrap();
        assert_eq!(
            configuration.to_content().unwrap(),
            json!({"id": "did:key:z1", "type": "IssuerConfiguration", "issuer": {"id": "did:key:z1"}, "flows": []})
        );
        let err = IssuerConfiguration::new(json!({"name": "x"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_create_inserts_then_overwrites() {
        let s = setup(&[Action::Read, Action::Write]).await;
        let configurations = configurations(&s.access, s.store.clone());

        let created = configurations
            .create(&s.account, &credential(), &s.registration)
            .await
            .unwrap();
        assert_eq!(created.id, "did:key:z1");
        assert_eq!(created.issuer["name"], json!("Registrar"));
        assert!(created.flows.is_empty());

        configurations
            .create(&s.account, &credential(), &s.registration)
            .await
            .unwrap();
        assert_eq!(s.store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_needs_configuration_capability() {
        let mut s = setup(&[Action::Read, Action::Write]).await;
        s.registration.capability.clear();
        let configurations = configurations(&s.access, s.store.clone());

        let err = configurations
            .create(&s.account, &credential(), &s.registration)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(s.store.is_empty());
    }

    #[tokio::test]
    async fn test_read_only_registration_cannot_create() {
        let s = setup(&[Action::Read]).await;
        let configurations = configurations(&s.access, s.store.clone());

        let err = configurations
            .create(&s.account, &credential(), &s.registration)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}

//! Capability registry: where delegated capabilities are stored and looked up.
//!
//! Capabilities are indexed by `(controller, referenceId)`, where the
//! controller is the principal the capability was delegated to.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tracing::debug;

use edv_access_core::Capability;

use crate::config::ServiceConfig;
use crate::error::{RemoteError, Result};
use crate::http::HttpClient;

const ZCAPS_ROUTE: &str = "/zcaps";
const REVOCATIONS_ROUTE: &str = "/zcaps/revocations";

/// Registry of delegated capabilities.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Look up a capability. A missing capability is `RemoteError::NotFound`.
    async fn get(&self, reference_id: &str, controller: &str) -> Result<Capability>;

    /// Every capability held by `controller`.
    async fn get_all(&self, controller: &str) -> Result<Vec<Capability>>;

    /// Store a capability, replacing one with the same controller and reference id.
    async fn store(&self, capability: &Capability) -> Result<()>;

    /// Revoke a capability so it can no longer be invoked.
    async fn revoke(&self, capability: &Capability) -> Result<()>;
}

/// Registry client over HTTP.
pub struct HttpRegistry {
    http: HttpClient,
}

impl HttpRegistry {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl CapabilityRegistry for HttpRegistry {
    async fn get(&self, reference_id: &str, controller: &str) -> Result<Capability> {
        let url = self.http.url(ZCAPS_ROUTE, &[])?;
        let request = self
            .http
            .request(Method::GET, url)
            .query(&[("referenceId", reference_id), ("controller", controller)]);
        self.http.get_json(request).await
    }

    async fn get_all(&self, controller: &str) -> Result<Vec<Capability>> {
        let url = self.http.url(ZCAPS_ROUTE, &[])?;
        let request = self
            .http
            .request(Method::GET, url)
            .query(&[("controller", controller)]);
        self.http.get_json(request).await
    }

    async fn store(&self, capability: &Capability) -> Result<()> {
        let url = self.http.url(ZCAPS_ROUTE, &[])?;
        self.http.post_empty(url, capability, None).await
    }

    async fn revoke(&self, capability: &Capability) -> Result<()> {
        let url = self.http.url(REVOCATIONS_ROUTE, &[])?;
        self.http
            .post_empty(url, &json!({ "capability": capability }), None)
            .await
    }
}

/// In-memory registry for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRegistry {
    capabilities: RwLock<Vec<Capability>>,
    revoked: RwLock<BTreeSet<String>>,
    fail_revocations: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `revoke` fail with a transport error.
    pub fn fail_revocations(&self, fail: bool) {
        self.fail_revocations.store(fail, Ordering::SeqCst);
    }

    /// Whether a capability id has been revoked.
    pub fn is_revoked(&self, id: &str) -> bool {
        self.revoked
            .read()
            .map(|revoked| revoked.contains(id))
            .unwrap_or(false)
    }

    fn poisoned() -> RemoteError {
        RemoteError::Transport("registry lock poisoned".into())
    }
}

#[async_trait]
impl CapabilityRegistry for MemoryRegistry {
    async fn get(&self, reference_id: &str, controller: &str) -> Result<Capability> {
        let capabilities = self.capabilities.read().map_err(|_| Self::poisoned())?;
        capabilities
            .iter()
            .find(|c| c.controller == controller && c.reference_id.as_deref() == Some(reference_id))
            .cloned()
            .ok_or_else(|| {
                RemoteError::NotFound(format!("{} for {}", reference_id, controller))
            })
    }

    async fn get_all(&self, controller: &str) -> Result<Vec<Capability>> {
        let capabilities = self.capabilities.read().map_err(|_| Self::poisoned())?;
        Ok(capabilities
            .iter()
            .filter(|c| c.controller == controller)
            .cloned()
            .collect())
    }

    async fn store(&self, capability: &Capability) -> Result<()> {
        let mut capabilities = self.capabilities.write().map_err(|_| Self::poisoned())?;
        capabilities.retain(|c| {
            !(c.controller == capability.controller && c.reference_id == capability.reference_id)
        });
        capabilities.push(capability.clone());
        debug!(id = %capability.id, controller = %capability.controller, "stored capability");
        Ok(())
    }

    async fn revoke(&self, capability: &Capability) -> Result<()> {
        if self.fail_revocations.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport(format!(
                "revocation of {} unavailable",
                capability.id
            )));
        }
        self.revoked
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(capability.id.clone());
        self.capabilities
            .write()
            .map_err(|_| Self::poisoned())?
            .retain(|c| c.id != capability.id);
        Ok(())
    }
}

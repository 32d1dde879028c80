//! Issuer instance and registration REST routes.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use edv_access_core::Capability;

use crate::config::ServiceConfig;
use crate::error::{RemoteError, Result};
use crate::http::HttpClient;
use crate::join::join_bounded;

const INSTANCES_ROUTE: &str = "/vc-issuer/instances";
const REGISTRATIONS_ROUTE: &str = "/vc-issuer/registrations";

/// An issuer instance: a tenant-like profile owning its own vault and keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Service-defined fields passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An issuer registration and the capabilities granted with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub controller: String,
    #[serde(default)]
    pub capability: Vec<Capability>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Registration {
    /// The granted capability with `reference_id`, if any.
    pub fn capability(&self, reference_id: &str) -> Option<&Capability> {
        self.capability
            .iter()
            .find(|c| c.reference_id.as_deref() == Some(reference_id))
    }
}

#[derive(Deserialize)]
struct RegistrationEnvelope {
    registration: Registration,
}

/// Client for `/vc-issuer/instances`.
pub struct InstanceService {
    http: HttpClient,
    concurrency: usize,
}

impl InstanceService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
            concurrency: config.concurrency,
        })
    }

    pub async fn create(&self, instance: &Instance) -> Result<Instance> {
        let url = self.http.url(INSTANCES_ROUTE, &[])?;
        self.http.post_json(url, instance, None).await
    }

    pub async fn get(&self, id: &str) -> Result<Instance> {
        let url = self.http.url(INSTANCES_ROUTE, &[id])?;
        self.http.get_json(self.http.request(Method::GET, url)).await
    }

    /// Every instance, optionally narrowed to one controller.
    pub async fn get_all(&self, controller: Option<&str>) -> Result<Vec<Instance>> {
        let url = self.http.url(INSTANCES_ROUTE, &[])?;
        let mut request = self.http.request(Method::GET, url);
        if let Some(controller) = controller {
            request = request.query(&[("controller", controller)]);
        }
        self.http.get_json(request).await
    }

    /// Fetch several instances, keeping the order of `ids`.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Instance>> {
        join_bounded(ids, self.concurrency, |id| self.get(id)).await
    }

    /// Remove an instance. Returns `false` if it did not exist.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let url = self.http.url(INSTANCES_ROUTE, &[id])?;
        let removed = self.http.delete(self.http.request(Method::DELETE, url)).await?;
        debug!(instance = %id, removed, "remove instance");
        Ok(removed)
    }

    /// Claim the user record reserved for `token` on an instance.
    pub async fn claim_user(&self, instance_id: &str, token: &str) -> Result<Value> {
        let url = self.http.url(INSTANCES_ROUTE, &[instance_id, "claim-user"])?;
        self.http
            .post_json(url, &json!({ "instanceId": instance_id, "token": token }), None)
            .await
    }

    /// Publish the latest version of a revocation list credential.
    ///
    /// `id` is the absolute URL of the list; the service answers 204.
    pub async fn publish_rlc(&self, id: &str, profile_agent: &str) -> Result<()> {
        if id.is_empty() {
            return Err(RemoteError::InvalidArgument("revocation list id is empty".into()));
        }
        let url = self.http.url(id, &["publish"])?;
        self.http
            .post_empty(url, &json!({ "profileAgent": profile_agent }), None)
            .await
    }
}

/// Client for `/vc-issuer/registrations`.
pub struct RegistrationService {
    http: HttpClient,
}

impl RegistrationService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }

    /// Register `controller` as an issuer by presenting a credential.
    pub async fn create(&self, controller: &str, presentation: &Value) -> Result<Registration> {
        let url = self.http.url(REGISTRATIONS_ROUTE, &[])?;
        let envelope: RegistrationEnvelope = self
            .http
            .post_json(
                url,
                &json!({ "controller": controller, "presentation": presentation }),
                None,
            )
            .await?;
        Ok(envelope.registration)
    }

    pub async fn get(&self, issuer: &str) -> Result<Registration> {
        let url = self.http.url(REGISTRATIONS_ROUTE, &[])?;
        let request = self
            .http
            .request(Method::GET, url)
            .query(&[("issuer", issuer)]);
        let envelope: RegistrationEnvelope = self.http.get_json(request).await?;
        Ok(envelope.registration)
    }

    pub async fn get_all(&self, controller: Option<&str>) -> Result<Vec<Value>> {
        let url = self.http.url(REGISTRATIONS_ROUTE, &[])?;
        let mut request = self.http.request(Method::GET, url);
        if let Some(controller) = controller {
            request = request.query(&[("controller", controller)]);
        }
        self.http.get_json(request).await
    }

    /// Remove a registration. Returns `false` if it did not exist.
    pub async fn remove(&self, issuer: &str) -> Result<bool> {
        let url = self.http.url(REGISTRATIONS_ROUTE, &[])?;
        let request = self
            .http
            .request(Method::DELETE, url)
            .query(&[("issuer", issuer)]);
        self.http.delete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_keeps_unknown_fields() {
        let raw = json!({
            "id": "z1",
            "controller": "urn:key:ed25519:00",
            "name": "Registrar",
            "keys": {"zcapKey": "k1"}
        });
        let instance: Instance = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(instance.name.as_deref(), Some("Registrar"));
        assert_eq!(instance.extra["keys"]["zcapKey"], "k1");
        assert_eq!(serde_json::to_value(&instance).unwrap(), raw);
    }

    #[test]
    fn test_registration_capability_lookup() {
        let raw = json!({
            "controller": "urn:key:ed25519:00",
            "capability": [{
                "id": "urn:zcap:1",
                "referenceId": "configuration",
                "controller": "urn:key:ed25519:00",
                "invoker": "urn:key:ed25519:00",
                "delegator": "urn:key:ed25519:00",
                "allowedAction": ["read", "write"],
                "invocationTarget": {"id": "https://edv.example/edvs/z1/documents", "type": "urn:edv:documents"}
            }]
        });
        let registration: Registration = serde_json::from_value(raw).unwrap();
        assert!(registration.capability("configuration").is_some());
        assert!(registration.capability("other").is_none());
    }

    #[test]
    fn test_claim_route() {
        let service = InstanceService::new(&ServiceConfig::new("https://issuer.example")).unwrap();
        let url = service.http.url(INSTANCES_ROUTE, &["z 1", "claim-user"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://issuer.example/vc-issuer/instances/z%201/claim-user"
        );
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_id() {
        let service = InstanceService::new(&ServiceConfig::new("https://issuer.example")).unwrap();
        let result = service.publish_rlc("", "urn:key:ed25519:00").await;
        assert!(matches!(result, Err(RemoteError::InvalidArgument(_))));
    }
}

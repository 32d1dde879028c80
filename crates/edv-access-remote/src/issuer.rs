//! Issuer configuration listing and credential issuance routes.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::http::HttpClient;

const CONFIGURATIONS_ROUTE: &str = "/vc-issuer/configurations";
const ISSUE_ROUTE: &str = "/vc-issuer/issue";

/// A request to issue credentials through one of an issuer's flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub issuer: String,
    pub flow: String,
    #[serde(default)]
    pub credentials: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation: Option<Value>,
}

#[derive(Deserialize)]
struct ConfigurationEntry {
    configuration: ConfigurationDocument,
}

#[derive(Deserialize)]
struct ConfigurationDocument {
    content: Value,
}

/// Client for `/vc-issuer/configurations` and `/vc-issuer/issue`.
pub struct IssuerService {
    http: HttpClient,
}

impl IssuerService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }

    /// The content of every configuration the service lists.
    pub async fn configurations(&self) -> Result<Vec<Value>> {
        let url = self.http.url(CONFIGURATIONS_ROUTE, &[])?;
        let entries: Vec<ConfigurationEntry> = self
            .http
            .get_json(self.http.request(Method::GET, url))
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.configuration.content)
            .collect())
    }

    /// Issue credentials; the service's answer is returned as it is.
    pub async fn issue(&self, request: &IssueRequest) -> Result<Value> {
        let url = self.http.url(ISSUE_ROUTE, &[])?;
        self.http.post_json(url, request, None).await
    }
}

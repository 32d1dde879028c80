//! Thin JSON-over-HTTP client shared by the remote services.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use edv_access_core::Invocation;

use crate::config::ServiceConfig;
use crate::error::{error_for_status, RemoteError, Result};

/// Header carrying a hex-encoded CBOR [`Invocation`].
pub const INVOCATION_HEADER: &str = "capability-invocation";

/// Encode an invocation for the [`INVOCATION_HEADER`].
pub fn encode_invocation(invocation: &Invocation) -> Result<String> {
    Ok(hex::encode(invocation.to_bytes()?))
}

/// Decode an invocation from the [`INVOCATION_HEADER`].
pub fn decode_invocation(header: &str) -> Result<Invocation> {
    let bytes = hex::decode(header).map_err(|e| RemoteError::Encoding(e.to_string()))?;
    Ok(Invocation::from_bytes(&bytes)?)
}

/// HTTP client bound to a service base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpClient {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/ld+json, application/json"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| RemoteError::InvalidArgument(format!("base url: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    /// Resolve a route and percent-encoded path segments under the base URL.
    ///
    /// Routes are relative to the base path even with a leading `/`, so a
    /// base of `https://host/api` keeps its `/api` prefix. Absolute URLs
    /// (such as resource ids) are used as they are.
    pub fn url(&self, route: &str, segments: &[&str]) -> Result<Url> {
        let mut url = match Url::parse(route) {
            Ok(url) => url,
            Err(_) => self
                .base
                .join(route.trim_start_matches('/'))
                .map_err(|e| RemoteError::InvalidArgument(format!("{}: {}", route, e)))?,
        };
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| RemoteError::InvalidArgument(format!("{} cannot have a path", route)))?
                .pop_if_empty()
                .extend(segments);
        }
        Ok(url)
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Attach an invocation header.
    pub fn invoke(builder: RequestBuilder, invocation: &Invocation) -> Result<RequestBuilder> {
        Ok(builder.header(INVOCATION_HEADER, encode_invocation(invocation)?))
    }

    /// Send a request, turning non-success statuses into errors.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "remote response");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status.as_u16(), &body))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        Ok(self.send(builder).await?.json().await?)
    }

    pub async fn post_json<B, T>(&self, url: Url, body: &B, invocation: Option<&Invocation>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.request(Method::POST, url).json(body);
        if let Some(invocation) = invocation {
            builder = Self::invoke(builder, invocation)?;
        }
        Ok(self.send(builder).await?.json().await?)
    }

    /// POST where the service answers with no body.
    pub async fn post_empty<B>(&self, url: Url, body: &B, invocation: Option<&Invocation>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.request(Method::POST, url).json(body);
        if let Some(invocation) = invocation {
            builder = Self::invoke(builder, invocation)?;
        }
        self.send(builder).await?;
        Ok(())
    }

    /// DELETE that reports a 404 as `false`.
    pub async fn delete(&self, builder: RequestBuilder) -> Result<bool> {
        match self.send(builder).await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Turn a not-found error into `None`.
pub fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RemoteError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

//! Configuration for remote service clients.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the remote services live and how to talk to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Base URL of the services, e.g. `https://issuer.example` or
    /// `https://host/api`; routes resolve under its path.
    pub base_url: String,

    /// Per-request timeout.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Maximum requests in flight for a fan-out.
    pub concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            concurrency: 8,
        }
    }
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Serde adapter for a [`Duration`] stored as whole milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"baseUrl": "https://issuer.example", "timeout": 1500}"#).unwrap();
        assert_eq!(config.base_url, "https://issuer.example");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.concurrency, ServiceConfig::default().concurrency);
    }
}

//! Configuration for the access layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use edv_access_remote::config::duration_millis;
use edv_access_remote::ServiceConfig;

/// Bounds for the conflict-retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Write attempts before giving up with `RetryExhausted`.
    pub max_attempts: u32,

    /// Wall-clock budget for the whole loop.
    #[serde(with = "duration_millis")]
    pub deadline: Duration,

    /// Pause after the first conflict; doubles after each further one.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,

    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            deadline: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Pause before the write following the `conflicts`-th conflict.
    pub fn backoff(&self, conflicts: u32) -> Duration {
        let factor = 1u32.checked_shl(conflicts.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Configuration for a [`VaultAccess`](crate::VaultAccess).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessConfig {
    /// Reference id of the keystore each controller keeps its keys in.
    pub keystore_reference_id: String,

    /// Retry bounds for read-modify-write updates.
    pub retry: RetryPolicy,

    /// Remote services and fan-out limit.
    pub service: ServiceConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            keystore_reference_id: "primary".to_string(),
            retry: RetryPolicy::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl AccessConfig {
    /// Maximum lookups in flight for a fan-out.
    pub fn concurrency(&self) -> usize {
        self.service.concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: AccessConfig = serde_json::from_str(
            r#"{"retry": {"maxAttempts": 3}, "service": {"baseUrl": "https://issuer.example"}}"#,
        )
        .unwrap();
        assert_eq!(config.keystore_reference_id, "primary");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.deadline, RetryPolicy::default().deadline);
        assert_eq!(config.service.base_url, "https://issuer.example");
    }

    proptest! {
        #[test]
        fn backoff_is_monotone_and_bounded(
            initial in 1u64..500,
            max in 1u64..5_000,
            conflicts in 0u32..64,
        ) {
            let policy = RetryPolicy {
                initial_backoff: Duration::from_millis(initial),
                max_backoff: Duration::from_millis(max),
                ..RetryPolicy::default()
            };
            prop_assert!(policy.backoff(conflicts) <= policy.max_backoff);
            prop_assert!(policy.backoff(conflicts) <= policy.backoff(conflicts + 1));
        }
    }
}

//! Capability lookup by `(referenceId, controller)`.

use std::sync::Arc;

use tracing::debug;

use edv_access_core::Capability;
use edv_access_remote::http::optional;
use edv_access_remote::{join_bounded, CapabilityRegistry};

use crate::error::{AccessError, Result};

/// Resolves capabilities from the registry.
///
/// A missing capability is a normal state while an instance is being
/// provisioned, so [`resolve`](Self::resolve) reports it as `None`.
pub struct CapabilityResolver {
    registry: Arc<dyn CapabilityRegistry>,
    concurrency: usize,
}

impl CapabilityResolver {
    pub fn new(registry: Arc<dyn CapabilityRegistry>, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency,
        }
    }

    /// Look up a capability; `None` if the registry has none.
    pub async fn resolve(&self, reference_id: &str, controller: &str) -> Result<Option<Capability>> {
        let found = optional(self.registry.get(reference_id, controller).await)?;
        debug!(reference_id, controller, found = found.is_some(), "resolve capability");
        Ok(found)
    }

    /// Look up a capability an operation cannot proceed without.
    pub async fn require(&self, reference_id: &str, controller: &str) -> Result<Capability> {
        self.resolve(reference_id, controller).await?.ok_or_else(|| {
            AccessError::PermissionDenied(format!(
                "{} holds no capability {}",
                controller, reference_id
            ))
        })
    }

    /// Resolve several reference ids, keeping their order.
    pub async fn resolve_all<S: AsRef<str>>(
        &self,
        reference_ids: &[S],
        controller: &str,
    ) -> Result<Vec<Option<Capability>>> {
        join_bounded(reference_ids, self.concurrency, |reference_id| {
            self.resolve(reference_id.as_ref(), controller)
        })
        .await
    }

    /// Resolve several capabilities an operation cannot proceed without,
    /// keeping their order. Any missing one is a permission error.
    pub async fn require_all<S: AsRef<str>>(
        &self,
        reference_ids: &[S],
        controller: &str,
    ) -> Result<Vec<Capability>> {
        let resolved = self.resolve_all(reference_ids, controller).await?;
        reference_ids
            .iter()
            .zip(resolved)
            .map(|(reference_id, capability)| {
                capability.ok_or_else(|| {
                    AccessError::PermissionDenied(format!(
                        "{} holds no capability {}",
                        controller,
                        reference_id.as_ref()
                    ))
                })
            })
            .collect()
    }
}

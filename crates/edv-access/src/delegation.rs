//! Granting and revoking a user's capabilities from their role set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use edv_access_core::{now_millis, Capability, Keypair};
use edv_access_perms::{
    delegate, plan_delegations, revocation_reference_ids, InstanceGrants, RoleSet, UserRecord,
};
use edv_access_remote::CapabilityRegistry;

use crate::error::Result;

/// A remote revocation that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationFailure {
    pub capability_id: String,
    pub reference_id: String,
    pub error: String,
}

/// Outcome of [`CapabilityDelegationEngine::revoke_capabilities`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationReport {
    /// Reference ids removed from the user record.
    pub removed: Vec<String>,
    /// Removed capabilities the registry did not confirm as revoked.
    pub failures: Vec<RevocationFailure>,
}

impl RevocationReport {
    /// Whether every removed capability was also revoked remotely.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delegates and revokes capabilities according to user roles.
pub struct CapabilityDelegationEngine {
    registry: Arc<dyn CapabilityRegistry>,
}

impl CapabilityDelegationEngine {
    pub fn new(registry: Arc<dyn CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Delegate what `user.capabilities` implies from the grantor's `grants`.
    ///
    /// Every planned delegation is signed before anything is stored, so a
    /// missing parent leaves both the registry and `user` untouched. The new
    /// capabilities are registered all-or-none and merged into `user.zcaps`,
    /// replacing earlier ones with the same reference id.
    pub async fn delegate(
        &self,
        user: &mut UserRecord,
        grants: &InstanceGrants,
        grantor: &Keypair,
    ) -> Result<Vec<Capability>> {
        let created = now_millis();
        let delegated = plan_delegations(&user.capabilities)
            .iter()
            .map(|request| {
                let parent = grants.parent_for(request)?;
                delegate(request, parent, &user.controller, grantor, created)
            })
            .collect::<edv_access_perms::Result<Vec<_>>>()?;

        self.register(&delegated).await?;
        user.merge_zcaps(delegated.iter().cloned());
        info!(user = %user.id, count = delegated.len(), "delegated capabilities");
        Ok(delegated)
    }

    /// Store `capabilities` in the registry, all or none.
    ///
    /// When a store fails, the capabilities stored before it are revoked
    /// again and the store error is returned.
    pub(crate) async fn register(&self, capabilities: &[Capability]) -> Result<()> {
        for (stored, capability) in capabilities.iter().enumerate() {
            if let Err(e) = self.registry.store(capability).await {
                warn!(capability = %capability.id, error = %e, "registration failed, rolling back");
                self.unregister(&capabilities[..stored]).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn unregister(&self, capabilities: &[Capability]) {
        for capability in capabilities {
            if let Err(e) = self.registry.revoke(capability).await {
                warn!(capability = %capability.id, error = %e, "rollback revocation failed");
            }
        }
    }

    /// Remove the capabilities `roles` imply from `user.zcaps` and revoke them.
    ///
    /// Local removal always happens. Remote revocation is attempted for each
    /// removed capability and failures are listed in the report.
    pub async fn revoke_capabilities(&self, user: &mut UserRecord, roles: &RoleSet) -> RevocationReport {
        let reference_ids = revocation_reference_ids(roles);
        let removed = user.remove_zcaps(&reference_ids);

        let mut report = RevocationReport::default();
        for capability in removed {
            let reference_id = capability.reference_id.clone().unwrap_or_default();
            if let Err(e) = self.registry.revoke(&capability).await {
                warn!(
                    user = %user.id,
                    capability = %capability.id,
                    error = %e,
                    "remote revocation failed"
                );
                report.failures.push(RevocationFailure {
                    capability_id: capability.id.clone(),
                    reference_id: reference_id.clone(),
                    error: e.to_string(),
                });
            }
            report.removed.push(reference_id);
        }
        info!(
            user = %user.id,
            removed = report.removed.len(),
            failed = report.failures.len(),
            "revoked capabilities"
        );
        report
    }
}

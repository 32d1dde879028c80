//! Role-driven capability delegation.
//!
//! An instance holds a capability for each resource a user may be given
//! access to, keyed by reference id. A user's role set is mapped to a list
//! of [`DelegationRequest`]s; each request is satisfied by delegating an
//! attenuated child of the instance's capability with the same reference id.

use std::collections::{BTreeMap, BTreeSet};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use edv_access_core::{Action, ActionSet, Capability, Keypair};

use crate::error::{PermsError, Result};
use crate::role::{Role, RoleSet};

/// Reference ids of the capabilities an instance delegates to its users.
pub mod reference {
    pub const PROFILE_INVOCATION_KEY: &str = "profile-capability-invocation-key";
    pub const USER_DOCUMENTS: &str = "user-edv-documents";
    pub const USER_REVOCATIONS: &str = "user-edv-revocations";
    pub const CREDENTIAL_DOCUMENTS: &str = "credential-edv-documents";
    pub const CREDENTIAL_HMAC: &str = "credential-edv-hmac";
    pub const CREDENTIAL_KAK: &str = "credential-edv-kak";
    pub const CREDENTIAL_REVOCATIONS: &str = "credential-edv-revocations";
    pub const KEY_ISSUANCE: &str = "key-issuance";
    pub const KEY_ISSUANCE_REVOCATIONS: &str = "key-issuance-revocations";
}

/// One capability a user should receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    pub reference_id: String,
    pub allowed_action: ActionSet,
}

impl DelegationRequest {
    pub fn new(reference_id: &str, actions: &[Action]) -> Self {
        Self {
            reference_id: reference_id.to_string(),
            allowed_action: ActionSet::of(actions),
        }
    }
}

/// Map a role set to the delegations it implies.
///
/// `Admin` contributes its own bundle. Of `Issue`, `Revoke` and `Read` only
/// the highest-priority one applies, in that order.
pub fn plan_delegations(roles: &RoleSet) -> Vec<DelegationRequest> {
    use reference::*;

    let mut requests = Vec::new();

    if roles.contains(Role::Admin) {
        requests.push(DelegationRequest::new(PROFILE_INVOCATION_KEY, &[Action::Sign]));
        requests.push(DelegationRequest::new(USER_DOCUMENTS, &[Action::Read, Action::Write]));
        requests.push(DelegationRequest::new(USER_REVOCATIONS, &[Action::Write]));
        requests.push(DelegationRequest::new(CREDENTIAL_REVOCATIONS, &[Action::Write]));
        requests.push(DelegationRequest::new(KEY_ISSUANCE_REVOCATIONS, &[Action::Write]));
    }

    let credential_documents = if roles.contains(Role::Issue) {
        requests.push(DelegationRequest::new(KEY_ISSUANCE, &[Action::Sign]));
        if roles.contains(Role::Read) || roles.contains(Role::Revoke) {
            Some(ActionSet::of(&[Action::Read, Action::Write]))
        } else {
            Some(ActionSet::of(&[Action::Write]))
        }
    } else if roles.contains(Role::Revoke) {
        Some(ActionSet::of(&[Action::Read, Action::Write]))
    } else if roles.contains(Role::Read) {
        Some(ActionSet::of(&[Action::Read]))
    } else {
        None
    };

    if let Some(allowed_action) = credential_documents {
        requests.push(DelegationRequest {
            reference_id: CREDENTIAL_DOCUMENTS.to_string(),
            allowed_action,
        });
        requests.push(DelegationRequest::new(CREDENTIAL_HMAC, &[Action::Sign]));
        requests.push(DelegationRequest::new(
            CREDENTIAL_KAK,
            &[Action::DeriveSecret, Action::Sign],
        ));
    }

    requests
}

/// Reference ids to remove from a user when revoking `roles`.
pub fn revocation_reference_ids(roles: &RoleSet) -> BTreeSet<String> {
    plan_delegations(roles)
        .into_iter()
        .map(|request| request.reference_id)
        .collect()
}

/// Delegate an attenuated child of `parent` to `invoker`.
///
/// `delegator` must be allowed to delegate `parent`, and the request may not
/// ask for actions the parent does not allow.
pub fn delegate(
    request: &DelegationRequest,
    parent: &Capability,
    invoker: &str,
    delegator: &Keypair,
    created: i64,
) -> Result<Capability> {
    let delegator_id = delegator.principal();
    if !parent.may_delegate(&delegator_id) {
        return Err(PermsError::PermissionDenied(format!(
            "{} may not delegate {}",
            delegator_id, parent.id
        )));
    }
    if request.allowed_action.is_empty() || !request.allowed_action.is_subset(&parent.allowed_action) {
        return Err(PermsError::PermissionDenied(format!(
            "{} does not allow the actions requested for {}",
            parent.id, request.reference_id
        )));
    }

    let mut capability = Capability {
        id: new_capability_id(),
        reference_id: Some(request.reference_id.clone()),
        controller: invoker.to_string(),
        invoker: invoker.to_string(),
        delegator: invoker.to_string(),
        allowed_action: request.allowed_action.clone(),
        invocation_target: parent.invocation_target.clone(),
        parent_capability: Some(parent.id.clone()),
        proof: None,
    };
    capability.sign_delegation(delegator, created)?;
    Ok(capability)
}

fn new_capability_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("urn:zcap:{}", hex::encode(bytes))
}

/// Capabilities an instance holds and can delegate, keyed by reference id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceGrants(BTreeMap<String, Capability>);

impl InstanceGrants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability under its reference id. Capabilities without one are ignored.
    pub fn insert(&mut self, capability: Capability) {
        if let Some(reference_id) = capability.reference_id.clone() {
            self.0.insert(reference_id, capability);
        }
    }

    pub fn get(&self, reference_id: &str) -> Option<&Capability> {
        self.0.get(reference_id)
    }

    /// The parent capability for a request.
    pub fn parent_for(&self, request: &DelegationRequest) -> Result<&Capability> {
        self.get(&request.reference_id).ok_or_else(|| {
            PermsError::PermissionDenied(format!(
                "instance holds no capability {}",
                request.reference_id
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for InstanceGrants {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut grants = Self::new();
        for capability in iter {
            grants.insert(capability);
        }
        grants
    }
}

/// A user of an instance and the capabilities delegated to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub controller: String,
    #[serde(default)]
    pub capabilities: RoleSet,
    #[serde(default)]
    pub zcaps: BTreeMap<String, Capability>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, controller: impl Into<String>, capabilities: RoleSet) -> Self {
        Self {
            id: id.into(),
            controller: controller.into(),
            capabilities,
            zcaps: BTreeMap::new(),
        }
    }

    /// Merge delegated capabilities, replacing any with the same reference id.
    pub fn merge_zcaps<I: IntoIterator<Item = Capability>>(&mut self, capabilities: I) {
        for capability in capabilities {
            if let Some(reference_id) = capability.reference_id.clone() {
                self.zcaps.insert(reference_id, capability);
            }
        }
    }

    /// Remove capabilities by reference id, returning the ones that were present.
    pub fn remove_zcaps<'a, I>(&mut self, reference_ids: I) -> Vec<Capability>
    where
        I: IntoIterator<Item = &'a String>,
    {
        reference_ids
            .into_iter()
            .filter_map(|reference_id| self.zcaps.remove(reference_id))
            .collect()
    }
}

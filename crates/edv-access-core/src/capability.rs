//! Authorization capabilities (zcaps).
//!
//! A capability grants its invoker a set of actions on an invocation target.
//! Root capabilities are implicit for a resource's controller; every other
//! capability is delegated from a parent and carries a proof signed by a
//! principal allowed to delegate the parent.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{verify_principal, Ed25519Signature, Keypair};
use crate::error::{CoreError, Result};

/// Domain separator for delegation proofs.
const DELEGATION_DOMAIN: &str = "edv-access/delegation/v1";

/// An action a capability may authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Read,
    Write,
    Sign,
    DeriveSecret,
}

impl Action {
    /// Every action, in canonical order.
    pub const ALL: [Action; 4] = [Action::Read, Action::Write, Action::Sign, Action::DeriveSecret];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Sign => "sign",
            Action::DeriveSecret => "deriveSecret",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of allowed actions.
///
/// Serialized as a bare string when it holds one action and as an array
/// otherwise, matching the wire shape of `allowedAction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(BTreeSet<Action>);

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action.
    pub fn all() -> Self {
        Action::ALL.into_iter().collect()
    }

    pub fn of(actions: &[Action]) -> Self {
        actions.iter().copied().collect()
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    pub fn is_subset(&self, other: &ActionSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn insert(&mut self, action: Action) -> bool {
        self.0.insert(action)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ActionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0.iter().next() {
            Some(action) if self.0.len() == 1 => action.serialize(serializer),
            _ => serializer.collect_seq(self.0.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for ActionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(Action),
            Many(Vec<Action>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(action) => ActionSet::of(&[action]),
            OneOrMany::Many(actions) => actions.into_iter().collect(),
        })
    }
}

/// The resource a capability points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationTarget {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
}

impl InvocationTarget {
    pub fn new(id: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_type: target_type.into(),
        }
    }

    /// Whether `target` is this resource or nested beneath it.
    pub fn covers(&self, target: &str) -> bool {
        target == self.id
            || target
                .strip_prefix(self.id.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

/// Signature binding a delegated capability to its delegator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProof {
    pub delegator: String,
    pub created: i64,
    pub signature: Ed25519Signature,
}

/// An authorization capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub controller: String,
    pub invoker: String,
    pub delegator: String,
    pub allowed_action: ActionSet,
    pub invocation_target: InvocationTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<CapabilityProof>,
}

impl Capability {
    /// The implicit root capability a controller holds over its own resource.
    pub fn root(target: InvocationTarget, controller: impl Into<String>) -> Self {
        let controller = controller.into();
        Self {
            id: format!("urn:zcap:root:{}", target.id),
            reference_id: None,
            invoker: controller.clone(),
            delegator: controller.clone(),
            controller,
            allowed_action: ActionSet::all(),
            invocation_target: target,
            parent_capability: None,
            proof: None,
        }
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_capability.is_none()
    }

    pub fn allows(&self, action: Action) -> bool {
        self.allowed_action.contains(action)
    }

    pub fn covers_target(&self, target: &str) -> bool {
        self.invocation_target.covers(target)
    }

    pub fn may_invoke(&self, principal: &str) -> bool {
        self.invoker == principal || self.controller == principal
    }

    pub fn may_delegate(&self, principal: &str) -> bool {
        self.delegator == principal || self.controller == principal
    }

    /// Whether this capability is a valid narrowing of `parent`.
    pub fn is_attenuation_of(&self, parent: &Capability) -> bool {
        self.parent_capability.as_deref() == Some(parent.id.as_str())
            && self.allowed_action.is_subset(&parent.allowed_action)
            && parent.covers_target(&self.invocation_target.id)
    }

    /// Bytes covered by a delegation proof.
    fn delegation_message(&self, delegator: &str, created: i64) -> Result<Vec<u8>> {
        let unsigned = Capability {
            proof: None,
            ..self.clone()
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&(DELEGATION_DOMAIN, &unsigned, delegator, created), &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Attach a delegation proof signed by `delegator`.
    pub fn sign_delegation(&mut self, delegator: &Keypair, created: i64) -> Result<()> {
        let principal = delegator.principal();
        let message = self.delegation_message(&principal, created)?;
        self.proof = Some(CapabilityProof {
            signature: delegator.sign(&message),
            delegator: principal,
            created,
        });
        Ok(())
    }

    /// Check the delegation proof signature.
    ///
    /// Whether the delegator was allowed to delegate is a question about the
    /// parent; see [`Capability::verify_delegated_from`].
    pub fn verify_proof(&self) -> Result<()> {
        let proof = self
            .proof
            .as_ref()
            .ok_or_else(|| CoreError::InvalidCapability(format!("{} has no proof", self.id)))?;
        let message = self.delegation_message(&proof.delegator, proof.created)?;
        verify_principal(&proof.delegator, &message, &proof.signature)
    }

    /// Full check of one delegation step.
    pub fn verify_delegated_from(&self, parent: &Capability) -> Result<()> {
        if !self.is_attenuation_of(parent) {
            return Err(CoreError::InvalidCapability(format!(
                "{} is not an attenuation of {}",
                self.id, parent.id
            )));
        }
        self.verify_proof()?;
        let delegator = self.proof.as_ref().map(|p| p.delegator.as_str()).unwrap_or("");
        if !parent.may_delegate(delegator) {
            return Err(CoreError::Unauthorized(format!(
                "{} may not delegate {}",
                delegator, parent.id
            )));
        }
        Ok(())
    }
}

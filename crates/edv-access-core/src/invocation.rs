//! Capability invocations.
//!
//! Every request to a capability-gated service carries an [`Invocation`]:
//! the capability being exercised, the action and target, and a signature by
//! the invoker. Services verify it with [`Invocation::verify`] and then decide
//! whether the capability chain is rooted in the resource's controller.

use serde::{Deserialize, Serialize};

use crate::capability::{Action, Capability};
use crate::crypto::{verify_principal, Ed25519Signature, Keypair};
use crate::error::{CoreError, Result};

/// Domain separator for invocation signatures.
const INVOCATION_DOMAIN: &str = "edv-access/invocation/v1";

/// A signed request to exercise a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub capability: Capability,
    pub action: Action,
    pub target: String,
    pub invoker: String,
    pub created: i64,
    pub signature: Ed25519Signature,
}

impl Invocation {
    /// Sign an invocation of `capability` for `action` on `target`.
    pub fn sign(
        keypair: &Keypair,
        capability: Capability,
        action: Action,
        target: impl Into<String>,
        created: i64,
    ) -> Result<Self> {
        let target = target.into();
        let invoker = keypair.principal();
        let message = Self::message(&capability.id, action, &target, &invoker, created)?;
        Ok(Self {
            signature: keypair.sign(&message),
            capability,
            action,
            target,
            invoker,
            created,
        })
    }

    fn message(
        capability_id: &str,
        action: Action,
        target: &str,
        invoker: &str,
        created: i64,
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(
            &(INVOCATION_DOMAIN, capability_id, action, target, invoker, created),
            &mut buf,
        )
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Verify this invocation authorizes `action` on `target`.
    ///
    /// Checks the invoker's signature, that the capability names the invoker,
    /// allows the action and covers the target, and for delegated
    /// capabilities that the delegation proof is intact.
    pub fn verify(&self, action: Action, target: &str) -> Result<()> {
        if self.action != action {
            return Err(CoreError::Unauthorized(format!(
                "invocation is for {} but {} was requested",
                self.action, action
            )));
        }
        if self.target != target {
            return Err(CoreError::Unauthorized(format!(
                "invocation targets {} not {}",
                self.target, target
            )));
        }
        if !self.capability.allows(action) {
            return Err(CoreError::Unauthorized(format!(
                "capability {} does not allow {}",
                self.capability.id, action
            )));
        }
        if !self.capability.covers_target(target) {
            return Err(CoreError::Unauthorized(format!(
                "capability {} does not cover {}",
                self.capability.id, target
            )));
        }
        if !self.capability.may_invoke(&self.invoker) {
            return Err(CoreError::Unauthorized(format!(
                "{} may not invoke {}",
                self.invoker, self.capability.id
            )));
        }

        let message = Self::message(
            &self.capability.id,
            self.action,
            &self.target,
            &self.invoker,
            self.created,
        )?;
        verify_principal(&self.invoker, &message, &self.signature)?;

        if !self.capability.is_root() {
            self.capability.verify_proof()?;
        }
        Ok(())
    }

    /// Verify the invocation and that its capability is rooted in `controller`.
    ///
    /// Root capabilities must belong to the controller. Delegated
    /// capabilities must carry a proof by the controller, so only one level
    /// of delegation is accepted.
    pub fn verify_rooted(&self, controller: &str, action: Action, target: &str) -> Result<()> {
        self.verify(action, target)?;

        let capability = &self.capability;
        let rooted = if capability.is_root() {
            capability.controller == controller
        } else {
            capability
                .proof
                .as_ref()
                .map_or(false, |proof| proof.delegator == controller)
        };
        if !rooted {
            return Err(CoreError::Unauthorized(format!(
                "{} is not rooted in {}",
                capability.id, controller
            )));
        }
        Ok(())
    }

    /// Encode as CBOR, e.g. for transport in a request header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

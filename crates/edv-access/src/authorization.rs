//! Asking a user agent for capabilities on an instance.
//!
//! The agent (a wallet, a browser credential handler) is injected as an
//! [`AuthorizationRequester`]; the user may decline, which is reported as
//! `None` rather than as an error.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use edv_access_core::{Action, ActionSet, Capability, KeyKind};

use crate::client::EDV_DOCUMENTS_TARGET_TYPE;
use crate::error::Result;

/// Target type of an assertion signing key.
pub const SIGNING_KEY_TARGET_TYPE: &str = "Ed25519VerificationKey2018";

/// Kind of resource a requested capability must point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetQuery {
    #[serde(rename = "type")]
    pub target_type: String,
}

/// One capability being asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityQuery {
    pub reference_id: String,
    pub allowed_action: ActionSet,
    pub invoker: String,
    pub delegator: String,
    pub invocation_target: TargetQuery,
}

/// A request for a set of capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationQuery {
    pub capability_query: Vec<CapabilityQuery>,
}

/// What the agent answers with when the user agrees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default)]
    pub capability: Vec<Capability>,
}

/// A user agent that can be asked to authorize capabilities.
#[async_trait]
pub trait AuthorizationRequester: Send + Sync {
    /// Present `query` to the user; `None` if they decline.
    async fn request_authorization(&self, query: &AuthorizationQuery) -> Result<Option<Presentation>>;
}

/// The query for full access to an instance's configuration vault, the
/// keys its documents are sealed and indexed with, and its assertion key,
/// delegated to `controller`.
pub fn instance_query(instance_id: &str, controller: &str) -> AuthorizationQuery {
    let query = |suffix: &str, actions: &[Action], target_type: &str| CapabilityQuery {
        reference_id: format!("{}-{}", instance_id, suffix),
        allowed_action: ActionSet::of(actions),
        invoker: controller.to_string(),
        delegator: controller.to_string(),
        invocation_target: TargetQuery {
            target_type: target_type.to_string(),
        },
    };
    AuthorizationQuery {
        capability_query: vec![
            query(
                "edv-configuration",
                &[Action::Read, Action::Write],
                EDV_DOCUMENTS_TARGET_TYPE,
            ),
            query("key-assertionMethod", &[Action::Sign], SIGNING_KEY_TARGET_TYPE),
            query(
                "edv-kak",
                &[Action::DeriveSecret, Action::Sign],
                &KeyKind::KeyAgreement.to_string(),
            ),
            query("edv-hmac", &[Action::Sign], &KeyKind::Hmac.to_string()),
        ],
    }
}

/// Ask `requester` for the instance capabilities.
///
/// Returns `None` if the user declines. Capabilities whose reference id was
/// not asked for are dropped.
pub async fn request_capabilities(
    requester: &dyn AuthorizationRequester,
    instance_id: &str,
    controller: &str,
) -> Result<Option<Vec<Capability>>> {
    let query = instance_query(instance_id, controller);
    let Some(presentation) = requester.request_authorization(&query).await? else {
        debug!(instance = %instance_id, "authorization declined");
        return Ok(None);
    };

    let requested: BTreeSet<&str> = query
        .capability_query
        .iter()
        .map(|q| q.reference_id.as_str())
        .collect();
    let granted: Vec<Capability> = presentation
        .capability
        .into_iter()
        .filter(|c| {
            c.reference_id
                .as_deref()
                .map_or(false, |id| requested.contains(id))
        })
        .collect();
    debug!(instance = %instance_id, granted = granted.len(), "authorization granted");
    Ok(Some(granted))
}

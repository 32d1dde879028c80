//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use edv_access::perms::{Role, RoleSet};
use edv_access_core::{Action, ActionSet, Capability, InvocationTarget, Keypair};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate any subset of the roles, including the empty set.
pub fn role_set() -> impl Strategy<Value = RoleSet> {
    proptest::sample::subsequence(Role::ALL.to_vec(), 0..=Role::ALL.len())
        .prop_map(|roles| roles.into_iter().collect())
}

/// Generate a non-empty set of actions.
pub fn action_set() -> impl Strategy<Value = ActionSet> {
    proptest::sample::subsequence(Action::ALL.to_vec(), 1..=Action::ALL.len())
        .prop_map(|actions| ActionSet::of(&actions))
}

/// Generate a non-empty subset of `actions`.
pub fn action_subset(actions: ActionSet) -> impl Strategy<Value = ActionSet> {
    let actions: Vec<Action> = actions.iter().collect();
    let len = actions.len();
    proptest::sample::subsequence(actions, 1..=len).prop_map(|subset| ActionSet::of(&subset))
}

/// Generate a collection type name.
pub fn content_type() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,15}".prop_map(String::from)
}

/// Generate an application-level item id.
pub fn item_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,23}".prop_map(String::from)
}

/// Generate a scalar JSON value usable as an index term.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,32}".prop_map(Value::String),
    ]
}

/// Generate extra item fields, never overriding `id` or `type`.
pub fn fields() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map("[a-z]{1,8}", scalar(), 0..6).prop_map(|fields| {
        fields
            .into_iter()
            .filter(|(name, _)| name != "id" && name != "type")
            .collect()
    })
}

/// Root capability over a random resource, controlled by `owner`.
pub fn root_capability(owner: &Keypair) -> impl Strategy<Value = Capability> {
    let owner = owner.principal();
    ("[a-z]{1,12}", action_set()).prop_map(move |(resource, actions)| {
        let mut root = Capability::root(
            InvocationTarget::new(format!("https://kms.example/{}", resource), "urn:test:resource"),
            owner.clone(),
        )
        .with_reference_id(resource);
        root.allowed_action = actions;
        root
    })
}

#[cfg(test)]
mod tests {
    use edv_access::perms::{delegate, plan_delegations, reference, DelegationRequest};

    use super::*;

    /// Actions the credential store is delegated with for `roles`.
    fn credential_store_actions(roles: &RoleSet) -> Option<ActionSet> {
        plan_delegations(roles)
            .into_iter()
            .find(|r| r.reference_id == reference::CREDENTIAL_DOCUMENTS)
            .map(|r| r.allowed_action)
    }

    proptest! {
        #[test]
        fn test_delegation_never_amplifies(
            (grantor, root, requested) in keypair()
                .prop_flat_map(|grantor| {
                    let root = root_capability(&grantor);
                    (Just(grantor), root)
                })
                .prop_flat_map(|(grantor, root)| {
                    let requested = action_subset(root.allowed_action.clone());
                    (Just(grantor), Just(root), requested)
                }),
            invoker in keypair(),
        ) {
            let request = DelegationRequest {
                reference_id: root.reference_id.clone().unwrap_or_default(),
                allowed_action: requested.clone(),
            };

            let child = delegate(&request, &root, &invoker.principal(), &grantor, 1).unwrap();
            prop_assert_eq!(&child.allowed_action, &requested);
            prop_assert_eq!(&child.controller, &invoker.principal());
            prop_assert!(child.verify_delegated_from(&root).is_ok());
        }

        #[test]
        fn test_stranger_cannot_delegate(
            owner in keypair(),
            stranger in keypair(),
            actions in action_set(),
        ) {
            prop_assume!(owner.principal() != stranger.principal());
            let root = Capability::root(
                InvocationTarget::new("https://edv.example/edvs/z1/documents", "urn:edv:documents"),
                owner.principal(),
            );
            let request = DelegationRequest {
                reference_id: "inst-1-edv-configuration".into(),
                allowed_action: actions,
            };
            prop_assert!(delegate(&request, &root, &stranger.principal(), &stranger, 1).is_err());
        }

        #[test]
        fn test_credential_store_follows_role_priority(roles in role_set()) {
            let expected = if roles.contains(Role::Issue) {
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
            prop_assert_eq!(credential_store_actions(&roles), expected);

            let issuance = plan_delegations(&roles)
                .into_iter()
                .any(|r| r.reference_id == reference::KEY_ISSUANCE);
            prop_assert_eq!(issuance, roles.contains(Role::Issue));
        }

        #[test]
        fn test_admin_bundle_independent_of_other_roles(roles in role_set()) {
            let mut with_admin = roles.clone();
            with_admin.insert(Role::Admin);

            let admin_only = plan_delegations(&RoleSet::of(&[Role::Admin]));
            let combined = plan_delegations(&with_admin);
            for request in &admin_only {
                prop_assert!(combined.contains(request));
            }
            prop_assert_eq!(
                credential_store_actions(&with_admin),
                credential_store_actions(&roles)
            );
        }

        #[test]
        fn test_generated_fields_keep_identity(fields in fields()) {
            prop_assert!(!fields.contains_key("id"));
            prop_assert!(!fields.contains_key("type"));
        }
    }
}

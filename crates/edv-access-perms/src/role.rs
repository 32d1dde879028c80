//! Role tags held by users of an instance.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PermsError;

/// A coarse permission a user holds on an issuer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Read,
    Write,
    Issue,
    Revoke,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Admin, Role::Read, Role::Write, Role::Issue, Role::Revoke];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Read => "Read",
            Role::Write => "Write",
            Role::Issue => "Issue",
            Role::Revoke => "Revoke",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| PermsError::UnknownRole(s.to_string()))
    }
}

/// The set of roles a user holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(roles: &[Role]) -> Self {
        roles.iter().copied().collect()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn remove(&mut self, role: Role) -> bool {
        self.0.remove(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!(matches!("Owner".parse::<Role>(), Err(PermsError::UnknownRole(_))));
    }

    #[test]
    fn test_role_set_json_is_a_list_of_tags() {
        let roles = RoleSet::of(&[Role::Read, Role::Admin]);
        let json = serde_json::to_value(&roles).unwrap();
        assert_eq!(json, serde_json::json!(["Admin", "Read"]));

        let parsed: RoleSet = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, roles);
    }
}

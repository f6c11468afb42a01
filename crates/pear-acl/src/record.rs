//! The persisted ACL record.

use crate::{Role, Visibility};
use pear_types::DEFAULT_BRANCH;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// User id to role map that keeps insertion order.
///
/// Serialized as a JSON object; the order of keys on disk is the order
/// grants were made, and derived user lists depend on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclMap(Vec<(String, Role)>);

impl AclMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Role of `user`, if any.
    pub fn get(&self, user: &str) -> Option<Role> {
        self.0.iter().find(|(u, _)| u == user).map(|(_, r)| *r)
    }

    /// Sets the role of `user`, keeping its position if already present.
    pub fn insert(&mut self, user: impl Into<String>, role: Role) {
        let user = user.into();
        match self.0.iter_mut().find(|(u, _)| *u == user) {
            Some(entry) => entry.1 = role,
            None => self.0.push((user, role)),
        }
    }

    /// Removes `user`, returning its previous role.
    pub fn remove(&mut self, user: &str) -> Option<Role> {
        let idx = self.0.iter().position(|(u, _)| u == user)?;
        Some(self.0.remove(idx).1)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Role)> {
        self.0.iter().map(|(u, r)| (u.as_str(), *r))
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no user has a role.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn with_exact_role(&self, role: Role) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(move |(_, r)| *r == role)
            .map(|(u, _)| u.as_str())
    }
}

impl<S: Into<String>> FromIterator<(S, Role)> for AclMap {
    fn from_iter<T: IntoIterator<Item = (S, Role)>>(iter: T) -> Self {
        let mut map = AclMap::new();
        for (user, role) in iter {
            map.insert(user, role);
        }
        map
    }
}

impl Serialize for AclMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (user, role) in &self.0 {
            map.serialize_entry(user, role)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AclMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AclMapVisitor;

        impl<'de> Visitor<'de> for AclMapVisitor {
            type Value = AclMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of user id to role")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<AclMap, A::Error> {
                let mut map = AclMap::new();
                while let Some((user, role)) = access.next_entry::<String, Role>()? {
                    map.insert(user, role);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(AclMapVisitor)
    }
}

/// Authorization record of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclRecord {
    /// Repository visibility.
    pub visibility: Visibility,
    /// Branches only admins may push to, force-push or delete.
    #[serde(rename = "protectedBranches")]
    pub protected_branches: Vec<String>,
    /// User id to role.
    #[serde(rename = "ACL")]
    pub acl: AclMap,
}

impl Default for AclRecord {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            protected_branches: vec![DEFAULT_BRANCH.to_string()],
            acl: AclMap::new(),
        }
    }
}

impl AclRecord {
    /// Users whose role is admin, in grant order.
    pub fn admins(&self) -> Vec<String> {
        self.acl.with_exact_role(Role::Admin).map(String::from).collect()
    }

    /// Raw contributors in grant order, followed by admins.
    pub fn contributors(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .acl
            .with_exact_role(Role::Contributor)
            .map(String::from)
            .collect();
        append_unique(&mut out, self.admins());
        out
    }

    /// Raw viewers in grant order, followed by the contributor list.
    pub fn viewers(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .acl
            .with_exact_role(Role::Viewer)
            .map(String::from)
            .collect();
        append_unique(&mut out, self.contributors());
        out
    }

    /// Role of `user`, if granted.
    pub fn role_of(&self, user: &str) -> Option<Role> {
        self.acl.get(user)
    }

    /// True if `user` holds at least `required`.
    pub fn has_role(&self, user: &str, required: Role) -> bool {
        self.role_of(user).is_some_and(|r| r.has(required))
    }

    /// True if `user` may list and fetch the repository.
    pub fn can_read(&self, user: &str) -> bool {
        self.visibility == Visibility::Public || self.has_role(user, Role::Viewer)
    }

    /// True if `branch` is protected.
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|b| b == branch)
    }
}

fn append_unique(out: &mut Vec<String>, more: Vec<String>) {
    for user in more {
        if !out.contains(&user) {
            out.push(user);
        }
    }
}

/// Partial record merged over the default by [`crate::AclStore::set_acl`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPatch {
    /// Visibility to set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Protected branches to set.
    #[serde(
        rename = "protectedBranches",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub protected_branches: Option<Vec<String>>,
    /// User roles to set.
    #[serde(rename = "ACL", default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<AclMap>,
}

impl AclPatch {
    /// Patch setting only the visibility.
    pub fn visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            ..Self::default()
        }
    }

    /// Applies the patch over the default record.
    pub fn merge_over_default(self) -> AclRecord {
        let base = AclRecord::default();
        AclRecord {
            visibility: self.visibility.unwrap_or(base.visibility),
            protected_branches: self.protected_branches.unwrap_or(base.protected_branches),
            acl: self.acl.unwrap_or(base.acl),
        }
    }
}

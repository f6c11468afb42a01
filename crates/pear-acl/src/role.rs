//! Roles and repository visibility.

use crate::AclError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role granted to a user on a repository.
///
/// Roles are cumulative: Viewer < Contributor < Admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can list and fetch the repository.
    Viewer,
    /// Can push to unprotected branches.
    Contributor,
    /// Can push anywhere and manage the ACL.
    Admin,
}

impl Role {
    /// Check if this role grants at least the required level.
    pub fn has(&self, required: Role) -> bool {
        *self >= required
    }

    /// Lowercase name as stored on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Contributor => "contributor",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "contributor" => Ok(Role::Contributor),
            "admin" => Ok(Role::Admin),
            other => Err(AclError::Validation(format!("Invalid role: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who can see a repository without an explicit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone may list and fetch.
    #[default]
    Public,
    /// Only users in the ACL may list and fetch.
    Private,
}

impl FromStr for Visibility {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(AclError::Validation(format!("Invalid visibility: {}", other))),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => f.write_str("public"),
            Visibility::Private => f.write_str("private"),
        }
    }
}

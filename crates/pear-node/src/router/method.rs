//! RPC method names.

use std::fmt;

use pear_auth::AuthScheme;

/// Every method the daemon can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetRepos,
    GetRefs,
    Push,
    ForcePush,
    DeleteBranch,
    GetAcl,
    AddAcl,
    DelAcl,
    DriveExists,
    DriveRead,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::GetRepos,
        Method::GetRefs,
        Method::Push,
        Method::ForcePush,
        Method::DeleteBranch,
        Method::GetAcl,
        Method::AddAcl,
        Method::DelAcl,
        Method::DriveExists,
        Method::DriveRead,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetRepos => "get-repos",
            Method::GetRefs => "get-refs",
            Method::Push => "push",
            Method::ForcePush => "f-push",
            Method::DeleteBranch => "d-branch",
            Method::GetAcl => "get-acl",
            Method::AddAcl => "add-acl",
            Method::DelAcl => "del-acl",
            Method::DriveExists => "drive-exists",
            Method::DriveRead => "drive-read",
        }
    }

    pub fn parse(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Push, force push or branch delete.
    pub fn mutates_refs(&self) -> bool {
        matches!(self, Method::Push | Method::ForcePush | Method::DeleteBranch)
    }

    /// Whether a daemon using `scheme` serves this method.
    pub fn is_served_under(&self, scheme: AuthScheme) -> bool {
        !self.mutates_refs() || scheme.exposes_push()
    }

    /// Methods a daemon using `scheme` serves.
    pub fn served_under(scheme: AuthScheme) -> Vec<Method> {
        Method::ALL.into_iter().filter(|m| m.is_served_under(scheme)).collect()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

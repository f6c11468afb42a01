//! Common types used throughout `gitpear`.
//!
//! This crate holds the vocabulary shared by the daemon, the command line
//! and the git remote helper: `pear://` URLs, validated repository and
//! branch names, git object ids and the ref tables built from them.

mod error;
mod name;
mod object_id;
mod request;
mod url;

pub use error::{Result, TypeError};
pub use name::{short_branch, validate_branch_name, validate_repo_name, BRANCH_REGEX, REPO_NAME_REGEX};
pub use object_id::{ObjectId, RefTable};
pub use request::{Request, RequestBody};
pub use url::{repo_name_from_url, PearUrl};

/// URL scheme handled by the remote helper.
pub const URL_SCHEME: &str = "pear";

/// Branch protected on every repository unless explicitly removed.
pub const DEFAULT_BRANCH: &str = "master";

/// Name of the git remote pointing at the local bare mirror.
pub const MIRROR_REMOTE: &str = "pear";

/// Directory under a repository home holding the bare object store.
pub const CODE_DIR: &str = "code";

/// Marker file whose presence means a repository is shared.
pub const SHARE_MARKER: &str = ".git-daemon-export-ok";

/// Drive path under which the pack for `oid` is published.
pub fn pack_path(oid: &ObjectId) -> String {
    format!("packs/{}.pack", oid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_path() {
        let oid = ObjectId::parse("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(
            pack_path(&oid),
            "packs/0123456789abcdef0123456789abcdef01234567.pack"
        );
    }
}

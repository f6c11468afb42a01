//! File-backed ACL store.

use crate::{
    error::{AclError, Result},
    record::{AclPatch, AclRecord},
    role::{Role, Visibility},
};
use parking_lot::Mutex;
use pear_types::validate_repo_name;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the ACL record inside a repository home.
pub const ACL_FILE: &str = "acl.json";

/// Store for per-repository ACL records under an application home.
///
/// Each repository's record lives at `<home>/<repo>/acl.json`. Writes go
/// to a temporary file that is renamed into place, and mutations within
/// one process are serialized so read-modify-write cycles do not interleave.
#[derive(Debug)]
pub struct AclStore {
    home: PathBuf,
    write_lock: Mutex<()>,
}

impl AclStore {
    /// Create a store rooted at `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Application home this store reads from.
    pub fn home(&self) -> &Path {
        &self.home
    }

    fn record_path(&self, repo: &str) -> Result<PathBuf> {
        validate_repo_name(repo)?;
        Ok(self.home.join(repo).join(ACL_FILE))
    }

    // ==================== Records ====================

    /// Read the record of `repo`, or the default record if none is stored.
    ///
    /// Never creates a file.
    pub fn get_acl(&self, repo: &str) -> Result<AclRecord> {
        let path = self.record_path(repo)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AclRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the record of `repo` with `patch` merged over the default record.
    pub fn set_acl(&self, repo: &str, patch: Option<AclPatch>) -> Result<AclRecord> {
        let record = patch.unwrap_or_default().merge_over_default();
        let _guard = self.write_lock.lock();
        self.persist(repo, &record)?;
        Ok(record)
    }

    fn persist(&self, repo: &str, record: &AclRecord) -> Result<()> {
        let path = self.record_path(repo)?;
        let dir = path
            .parent()
            .ok_or_else(|| AclError::Storage(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, record)?;
        temp.write_all(b"\n")?;
        temp.persist(&path).map_err(|e| AclError::Storage(e.to_string()))?;

        tracing::debug!(repo = %repo, path = %path.display(), "ACL record written");
        Ok(())
    }

    fn update<F>(&self, repo: &str, mutate: F) -> Result<AclRecord>
    where
        F: FnOnce(&mut AclRecord),
    {
        let _guard = self.write_lock.lock();
        let mut record = self.get_acl(repo)?;
        mutate(&mut record);
        self.persist(repo, &record)?;
        Ok(record)
    }

    // ==================== Users ====================

    /// Grant `role` to `user`. The role name must be one of the fixed roles.
    pub fn grant_access_to_user(&self, repo: &str, user: &str, role: &str) -> Result<AclRecord> {
        let role: Role = role.parse()?;
        self.grant(repo, user, role)
    }

    /// Grant a typed role to `user`.
    pub fn grant(&self, repo: &str, user: &str, role: Role) -> Result<AclRecord> {
        if user.is_empty() {
            return Err(AclError::Validation("user id must not be empty".into()));
        }
        self.update(repo, |record| record.acl.insert(user, role))
    }

    /// Remove any role held by `user`.
    pub fn revoke_access_from_user(&self, repo: &str, user: &str) -> Result<AclRecord> {
        self.update(repo, |record| {
            record.acl.remove(user);
        })
    }

    /// Role held by `user`, if any.
    pub fn get_user_role(&self, repo: &str, user: &str) -> Result<Option<Role>> {
        Ok(self.get_acl(repo)?.role_of(user))
    }

    /// Admins of `repo` in grant order.
    pub fn get_admins(&self, repo: &str) -> Result<Vec<String>> {
        Ok(self.get_acl(repo)?.admins())
    }

    /// Contributors of `repo`, then admins.
    pub fn get_contributors(&self, repo: &str) -> Result<Vec<String>> {
        Ok(self.get_acl(repo)?.contributors())
    }

    /// Viewers of `repo`, then contributors, then admins.
    pub fn get_viewers(&self, repo: &str) -> Result<Vec<String>> {
        Ok(self.get_acl(repo)?.viewers())
    }

    // ==================== Branches ====================

    /// Protect `branch`. Adding an already protected branch is a no-op.
    pub fn add_protected_branch(&self, repo: &str, branch: &str) -> Result<AclRecord> {
        pear_types::validate_branch_name(branch)?;
        self.update(repo, |record| {
            if !record.is_protected(branch) {
                record.protected_branches.push(branch.to_string());
            }
        })
    }

    /// Remove protection from `branch`.
    pub fn remove_protected_branch(&self, repo: &str, branch: &str) -> Result<AclRecord> {
        self.update(repo, |record| {
            record.protected_branches.retain(|b| b != branch);
        })
    }

    /// Protected branches of `repo`.
    pub fn get_protected_branches(&self, repo: &str) -> Result<Vec<String>> {
        Ok(self.get_acl(repo)?.protected_branches)
    }

    // ==================== Visibility ====================

    /// Make `repo` visible to everyone.
    pub fn make_repo_public(&self, repo: &str) -> Result<AclRecord> {
        self.update(repo, |record| record.visibility = Visibility::Public)
    }

    /// Restrict `repo` to users in its ACL.
    pub fn make_repo_private(&self, repo: &str) -> Result<AclRecord> {
        self.update(repo, |record| record.visibility = Visibility::Private)
    }

    /// Current visibility of `repo`.
    pub fn get_repo_visibility(&self, repo: &str) -> Result<Visibility> {
        Ok(self.get_acl(repo)?.visibility)
    }
}

//! Layout of the application home directory.
//!
//! ```text
//! <home>/
//!   config.yaml        optional daemon configuration
//!   .secret            node key (hex)
//!   .daemon.pid        pid of a running daemon
//!   .drives/<repo>/    published packs
//!   out.log, err.log   daemon output when started in the background
//!   <repo>/code/       bare repository
//!   <repo>/acl.json    ACL record
//!   <repo>/.git-daemon-export-ok
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pear_types::{validate_repo_name, CODE_DIR, SHARE_MARKER};

use crate::{NodeError, Result};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "GIT_PEAR";

const PID_FILE: &str = ".daemon.pid";
const SECRET_FILE: &str = ".secret";
const DRIVES_DIR: &str = ".drives";
const CONFIG_FILE: &str = "config.yaml";

/// The gitpear home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppHome {
    root: PathBuf,
}

impl AppHome {
    /// Home rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Home from `GIT_PEAR`, defaulting to `~/.gitpear`.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| NodeError::Config(format!("cannot locate a home directory, set {}", HOME_ENV)))?;
        Ok(Self::new(home.join(".gitpear")))
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn secret_path(&self) -> PathBuf {
        self.root.join(SECRET_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn out_log_path(&self) -> PathBuf {
        self.root.join("out.log")
    }

    pub fn err_log_path(&self) -> PathBuf {
        self.root.join("err.log")
    }

    /// Directory holding everything about `name`.
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Bare repository of `name`.
    pub fn code_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(CODE_DIR)
    }

    /// Drive directory of `name`.
    pub fn drive_path(&self, name: &str) -> PathBuf {
        self.root.join(DRIVES_DIR).join(name)
    }

    /// Creates `<home>/<name>/code`.
    pub fn create_repo_dir(&self, name: &str) -> Result<()> {
        validate_repo_name(name)?;
        fs::create_dir_all(self.code_path(name))?;
        Ok(())
    }

    /// True once the bare repository exists.
    pub fn is_initialized(&self, name: &str) -> bool {
        self.code_path(name).join("HEAD").exists()
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.repo_path(name).join(SHARE_MARKER).exists()
    }

    /// Marks `name` as shared.
    pub fn share(&self, name: &str) -> Result<()> {
        validate_repo_name(name)?;
        fs::create_dir_all(self.repo_path(name))?;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.repo_path(name).join(SHARE_MARKER))?;
        Ok(())
    }

    /// Removes the shared marker of `name`; a repository that was not shared is left as is.
    pub fn unshare(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.repo_path(name).join(SHARE_MARKER)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Initialized repositories, sorted; only shared ones when `shared_only`.
    pub fn list(&self, shared_only: bool) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            if !self.is_initialized(&name) || (shared_only && !self.is_shared(&name)) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    // ==================== Daemon process record ====================

    pub fn store_daemon_pid(&self, pid: u32) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.pid_path(), pid.to_string())?;
        Ok(())
    }

    /// PID of the recorded daemon. An unreadable record counts as none.
    pub fn daemon_pid(&self) -> Result<Option<u32>> {
        match fs::read_to_string(self.pid_path()) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove_daemon_pid(&self) -> Result<()> {
        match fs::remove_file(self.pid_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(home: &AppHome, name: &str) {
        home.create_repo_dir(name).unwrap();
        fs::write(home.code_path(name).join("HEAD"), "ref: refs/heads/master\n").unwrap();
    }

    #[test]
    fn test_list_filters_uninitialized_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let home = AppHome::new(dir.path());
        init(&home, "zeta");
        init(&home, "alpha");
        home.create_repo_dir("half").unwrap();
        fs::create_dir_all(home.drive_path("alpha")).unwrap();
        fs::write(home.secret_path(), "00").unwrap();

        assert_eq!(home.list(false).unwrap(), vec!["alpha", "zeta"]);
        assert!(home.list(true).unwrap().is_empty());
    }

    #[test]
    fn test_share_and_unshare() {
        let dir = tempfile::tempdir().unwrap();
        let home = AppHome::new(dir.path());
        init(&home, "foo");

        home.share("foo").unwrap();
        home.share("foo").unwrap();
        assert!(home.is_shared("foo"));
        assert_eq!(home.list(true).unwrap(), vec!["foo"]);

        home.unshare("foo").unwrap();
        home.unshare("foo").unwrap();
        assert!(!home.is_shared("foo"));
        assert!(home.list(true).unwrap().is_empty());
    }

    #[test]
    fn test_missing_home_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let home = AppHome::new(dir.path().join("absent"));
        assert!(home.list(false).unwrap().is_empty());
        assert_eq!(home.daemon_pid().unwrap(), None);
    }

    #[test]
    fn test_pid_record() {
        let dir = tempfile::tempdir().unwrap();
        let home = AppHome::new(dir.path());
        home.store_daemon_pid(4242).unwrap();
        assert_eq!(home.daemon_pid().unwrap(), Some(4242));
        home.remove_daemon_pid().unwrap();
        home.remove_daemon_pid().unwrap();
        assert_eq!(home.daemon_pid().unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let home = AppHome::new(dir.path());
        assert!(home.create_repo_dir("../escape").is_err());
        assert!(home.share(".hidden").is_err());
    }
}

//! Node configuration.
//!
//! Values come from `<home>/config.yaml` when present and are then
//! overridden by `GIT_PEAR_*` environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use pear_auth::AuthScheme;
use pear_p2p::{PeerDirectory, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

use crate::observability::LogFormat;
use crate::{NodeError, Result};

/// Selects the auth scheme.
pub const AUTH_ENV: &str = "GIT_PEAR_AUTH";
/// Secret used to sign requests under the `nip98` scheme.
pub const AUTH_SECRET_ENV: &str = "GIT_PEAR_AUTH_NSEC";
/// Overrides the daemon listen address.
pub const LISTEN_ENV: &str = "GIT_PEAR_LISTEN";

/// Configuration for the gitpear daemon and its clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the daemon accepts peer connections on.
    pub listen_addr: SocketAddr,
    /// How callers are identified.
    pub auth: AuthScheme,
    /// Known peers: hex public key to address.
    pub peers: BTreeMap<String, SocketAddr>,
    /// Log level.
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
    /// Limit on a server-side git mutation.
    pub git_timeout_secs: u64,
    /// Limit on a single RPC made by a client.
    pub request_timeout_secs: u64,

    /// Signing secret, never read from or written to the file.
    #[serde(skip)]
    pub auth_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            auth: AuthScheme::None,
            peers: BTreeMap::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            git_timeout_secs: 300,
            request_timeout_secs: 60,
            auth_secret: None,
        }
    }
}

impl Config {
    /// Loads the configuration for `path`, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text)
                .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(AUTH_ENV) {
            self.auth = AuthScheme::from_env_value(Some(&value))
                .map_err(|e| NodeError::Config(e.detail().to_string()))?;
        }
        if let Some(value) = lookup(LISTEN_ENV) {
            self.listen_addr = value
                .parse()
                .map_err(|e| NodeError::Config(format!("{}={}: {}", LISTEN_ENV, value, e)))?;
        }
        if let Some(value) = lookup(AUTH_SECRET_ENV).filter(|v| !v.trim().is_empty()) {
            self.auth_secret = Some(value);
        }
        Ok(())
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.auth.uses_header() && self.auth_secret.is_none() {
            tracing::warn!("{} is not set, requests cannot be signed", AUTH_SECRET_ENV);
        }
        for key in self.peers.keys() {
            let valid = key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(NodeError::Config(format!("invalid peer key: {}", key)));
            }
        }
        if self.git_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(NodeError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Parsed log format.
    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Peer directory including this node's own key at its listen address.
    pub fn directory(&self, own_key: &str) -> PeerDirectory {
        let mut directory: PeerDirectory = self
            .peers
            .iter()
            .map(|(key, addr)| (key.clone(), *addr))
            .collect();
        directory.insert(own_key, self.listen_addr);
        directory
    }
}

//! `pear://<key>/<repo>` URLs.

use crate::{validate_repo_name, Result, TypeError, URL_SCHEME};
use std::fmt;

/// A parsed `pear://<64 hex key>/<repo>` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PearUrl {
    key: String,
    repo: String,
}

impl PearUrl {
    /// Builds a URL from a hex key and repository name.
    pub fn new(key: &str, repo: &str) -> Result<Self> {
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(TypeError::InvalidUrl(format!(
                "key must be 64 hex characters, got {:?}",
                key
            )));
        }
        validate_repo_name(repo)?;
        Ok(Self {
            key: key.to_ascii_lowercase(),
            repo: repo.to_string(),
        })
    }

    /// Parses a URL of the form `pear://<key>/<repo>`.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| TypeError::InvalidUrl(format!("{} is not a pear:// url", url)))?;

        let rest = rest.trim_end_matches('/');
        let (key, repo) = rest
            .split_once('/')
            .ok_or_else(|| TypeError::InvalidUrl(format!("{} has no repository", url)))?;

        Self::new(key, repo)
    }

    /// URL naming only the peer, `pear://<key>`. Its repository is empty.
    pub fn peer(key: &str) -> Result<Self> {
        let mut url = Self::new(key, "x")?;
        url.repo.clear();
        Ok(url)
    }

    /// Parses `pear://<key>` or `pear://<key>/<repo>`.
    pub fn parse_peer(url: &str) -> Result<Self> {
        match Self::parse(url) {
            Ok(url) => Ok(url),
            Err(TypeError::InvalidUrl(_)) => {
                let key = url
                    .strip_prefix("pear://")
                    .map(|k| k.trim_end_matches('/'))
                    .ok_or_else(|| TypeError::InvalidUrl(format!("{} is not a pear:// url", url)))?;
                Self::peer(key)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns true if `url` uses the pear scheme.
    pub fn is_pear_url(url: &str) -> bool {
        url.starts_with("pear://")
    }

    /// Hex encoded key of the peer owning the repository.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw bytes of the peer key.
    pub fn key_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        if let Ok(raw) = hex::decode(&self.key) {
            out.copy_from_slice(&raw);
        }
        out
    }

    /// Repository name.
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for PearUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repo.is_empty() {
            return write!(f, "{}://{}", URL_SCHEME, self.key);
        }
        write!(f, "{}://{}/{}", URL_SCHEME, self.key, self.repo)
    }
}

impl std::str::FromStr for PearUrl {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Repository name carried by a request url: its last path segment.
pub fn repo_name_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

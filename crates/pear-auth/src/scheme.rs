//! Pluggable request authentication.

use crate::event::{EventSigner, SignedEvent};
use crate::replay::ReplayGuard;
use crate::{AuthError, Result};
use pear_types::{Request, RequestBody};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// How callers are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthScheme {
    /// The hex transport key is the user id and push methods are not exposed.
    #[default]
    #[serde(rename = "none")]
    None,
    /// The hex transport key is the user id and push methods are exposed.
    #[serde(rename = "native")]
    TransportNative,
    /// Requests carry a signed event; the user id is its `npub`.
    #[serde(rename = "nip98")]
    ExternalSigned,
}

impl AuthScheme {
    /// Scheme selected by the value of `GIT_PEAR_AUTH`.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value {
            None => Ok(AuthScheme::None),
            Some(v) => v.parse(),
        }
    }

    /// True if push, force-push and branch delete are served.
    pub fn exposes_push(&self) -> bool {
        !matches!(self, AuthScheme::None)
    }

    /// True if requests must carry a signed header.
    pub fn uses_header(&self) -> bool {
        matches!(self, AuthScheme::ExternalSigned)
    }
}

impl FromStr for AuthScheme {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "none" => Ok(AuthScheme::None),
            "native" => Ok(AuthScheme::TransportNative),
            "nip98" => Ok(AuthScheme::ExternalSigned),
            other => Err(AuthError::Config(format!("unknown auth scheme: {}", other))),
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::None => f.write_str("none"),
            AuthScheme::TransportNative => f.write_str("native"),
            AuthScheme::ExternalSigned => f.write_str("nip98"),
        }
    }
}

/// Maps a transport key plus request to a user id, and signs outgoing requests.
#[derive(Debug)]
pub struct Authenticator {
    scheme: AuthScheme,
    signer: Option<EventSigner>,
    replay: ReplayGuard,
}

impl Authenticator {
    /// Authenticator that can verify but not sign.
    pub fn new(scheme: AuthScheme) -> Self {
        Self {
            scheme,
            signer: None,
            replay: ReplayGuard::new(),
        }
    }

    /// Authenticator holding an optional signing secret (`nsec` or hex).
    pub fn with_secret(scheme: AuthScheme, secret: Option<&str>) -> Result<Self> {
        let signer = secret.map(EventSigner::from_secret_str).transpose()?;
        Ok(Self {
            scheme,
            signer,
            replay: ReplayGuard::new(),
        })
    }

    /// Configured scheme.
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// User id of the caller behind `peer_key` sending `request`.
    pub fn authenticate(&self, peer_key: &[u8], request: &Request) -> Result<String> {
        self.authenticate_at(peer_key, request, unix_now())
    }

    /// Same as [`Authenticator::authenticate`] with an explicit clock.
    pub fn authenticate_at(&self, peer_key: &[u8], request: &Request, now: u64) -> Result<String> {
        match self.scheme {
            AuthScheme::None | AuthScheme::TransportNative => Ok(hex::encode(peer_key)),
            AuthScheme::ExternalSigned => {
                let header = request.header.as_deref().ok_or(AuthError::NotAllowed)?;
                let event = SignedEvent::from_header(header)?;
                event.verify(&request.body, now)?;
                self.replay.admit(&event.id, event.created_at, now)?;
                event.npub()
            }
        }
    }

    /// Header to attach to `body`, if the scheme uses one.
    pub fn get_token(&self, body: &RequestBody) -> Result<Option<String>> {
        self.get_token_at(body, unix_now())
    }

    /// Same as [`Authenticator::get_token`] with an explicit clock.
    pub fn get_token_at(&self, body: &RequestBody, now: u64) -> Result<Option<String>> {
        if !self.scheme.uses_header() {
            return Ok(None);
        }
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AuthError::Config("missing secret key (GIT_PEAR_AUTH_NSEC)".into()))?;
        SignedEvent::for_request(signer, body, now).to_header().map(Some)
    }

    /// Builds a full request for `body`, signing it when required.
    pub fn request(&self, body: RequestBody) -> Result<Request> {
        let header = self.get_token(&body)?;
        Ok(Request { body, header })
    }

    /// The user id this authenticator presents to peers under the signed scheme.
    pub fn own_npub(&self) -> Option<String> {
        self.signer.as_ref().and_then(|s| s.npub().ok())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

//! Request authentication for gitpear.
//!
//! The daemon never special-cases verification logic: it asks an
//! [`Authenticator`] for the caller's user id and authorizes that id
//! against the repository ACL. The scheme is chosen once at startup:
//!
//! - [`AuthScheme::None`]: the hex transport key is the user id, read-only
//! - [`AuthScheme::TransportNative`]: the hex transport key is the user id
//! - [`AuthScheme::ExternalSigned`]: a signed event in the request header,
//!   user id is the signer's bech32 `npub`

mod error;
mod event;
mod replay;
mod scheme;

pub use error::{AuthError, Result};
pub use event::{
    body_hash, hex_from_npub, npub_from_hex, payload_hash, EventSigner, SignedEvent, HTTP_AUTH_KIND,
    MAX_CLOCK_SKEW_SECS,
};
pub use replay::ReplayGuard;
pub use scheme::{AuthScheme, Authenticator};

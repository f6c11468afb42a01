//! # pear-node
//!
//! The gitpear daemon and its client session.
//!
//! ```text
//!  git-remote-pear / git-pear            git-peard
//!  ┌──────────────┐   handshake + RPC   ┌──────────────────────────────┐
//!  │ PeerSession  │ ──────────────────▶ │ Router (one per remote key)  │
//!  │ RemoteDrive  │                     │   Authenticate → Parse →     │
//!  └──────────────┘                     │   Authorize → Execute        │
//!                                       ├──────────────────────────────┤
//!                                       │ AppContext                   │
//!                                       │   AclStore  Authenticator    │
//!                                       │   RepoState (swapped whole)  │
//!                                       │   Drives    GitBridge        │
//!                                       └──────────────────────────────┘
//! ```
//!
//! The daemon serves the repositories shared under the application home
//! (see [`home`]). Every ref it advertises has its pack published into the
//! repository's drive, from which clients stream it into `git index-pack`.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod context;
pub mod daemon;
mod error;
pub mod home;
pub mod observability;
pub mod router;
pub mod state;

pub use client::{client_keypair, PeerSession, RemoteDrive};
pub use config::Config;
pub use context::AppContext;
pub use daemon::{watch_home, Daemon};
pub use error::{NodeError, Result};
pub use home::AppHome;
pub use router::{Method, Router};
pub use state::{refresh_state, RepoState};

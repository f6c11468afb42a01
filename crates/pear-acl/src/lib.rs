//! Per-repository access control for gitpear.
//!
//! This crate provides:
//! - **Roles**: `admin ⊇ contributor ⊇ viewer`
//! - **Visibility**: public repositories are readable by anyone
//! - **Protected branches**: only admins may push, force-push or delete them
//! - **AclStore**: durable JSON records, one per repository
//!
//! # Example
//!
//! ```
//! use pear_acl::{AclStore, Role};
//!
//! let home = tempfile::tempdir().unwrap();
//! let store = AclStore::new(home.path());
//!
//! store.grant_access_to_user("foo", "u1", "admin").unwrap();
//! store.grant_access_to_user("foo", "u3", "contributor").unwrap();
//!
//! assert_eq!(store.get_contributors("foo").unwrap(), vec!["u3", "u1"]);
//! assert_eq!(store.get_user_role("foo", "u1").unwrap(), Some(Role::Admin));
//! ```

mod error;
mod record;
mod role;
mod store;

pub use error::{AclError, Result};
pub use record::{AclMap, AclPatch, AclRecord};
pub use role::{Role, Visibility};
pub use store::{AclStore, ACL_FILE};

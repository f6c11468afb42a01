//! Logging setup shared by the gitpear binaries.

mod logging;

pub use logging::{init_logging, LogFormat};

//! Structured logging initialization.
//!
//! All output goes to stderr: the remote helper owns stdout for its
//! conversation with git, and the daemon's streams are redirected to log
//! files when it runs in the background.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: &[&str] = &[
    "pear_types",
    "pear_acl",
    "pear_auth",
    "pear_git",
    "pear_p2p",
    "pear_node",
    "git_peard",
    "git_pear",
    "git_remote_pear",
];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format (for development).
    Pretty,
    /// JSON format (for log aggregation).
    Json,
    /// Single-line format for short-lived processes.
    Compact,
}

impl LogFormat {
    /// Parse log format from string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is harmless;
/// the second subscriber is not installed.
///
/// # Example
///
/// ```rust,no_run
/// use pear_node::observability::{init_logging, LogFormat};
///
/// init_logging("info", LogFormat::Json);
/// ```
pub fn init_logging(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = CRATES.iter().map(|c| format!("{}={}", c, level)).collect();
        directives.join(",").into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr).with_target(false))
            .try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(level = %level, format = format.as_str(), "logging initialized");
    }
}

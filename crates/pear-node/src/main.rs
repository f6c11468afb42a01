//! git-peard: serves shared gitpear repositories to peers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pear_node::observability::{init_logging, LogFormat};
use pear_node::{watch_home, AppContext, AppHome, Config, Daemon};

/// gitpear daemon
#[derive(Parser, Debug)]
#[command(name = "git-peard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Application home (defaults to $GIT_PEAR or ~/.gitpear)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Listen address, overriding config and GIT_PEAR_LISTEN
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        tracing::error!(error = %format!("{:#}", e), "daemon failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let home = match args.home {
        Some(dir) => AppHome::new(dir),
        None => AppHome::from_env()?,
    };
    std::fs::create_dir_all(home.root())
        .with_context(|| format!("cannot create {}", home.root().display()))?;

    let mut config = Config::load(&home.config_path())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }
    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), home = %home.root().display(), auth = %config.auth, "starting git-peard");

    let ctx = Arc::new(AppContext::open(home, config)?);
    println!("\n\tPublic key: {}\n", ctx.keypair().public_hex());

    ctx.refresh().await.context("initial refresh failed")?;
    let _watcher = watch_home(Arc::clone(&ctx))?;

    let daemon = Daemon::bind(Arc::clone(&ctx)).await?;
    daemon.run(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

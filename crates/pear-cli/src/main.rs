//! git-pear: share git repositories with peers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pear_acl::Visibility;
use pear_node::observability::{init_logging, LogFormat};
use pear_node::AppHome;

mod acl;
mod commands;
mod daemon;
mod step;

use acl::{AclAction, AclTarget};

/// gitpear - git over peer-to-peer connections
#[derive(Parser, Debug)]
#[command(name = "git-pear", bin_name = "git pear")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (--verbose, --verbose --verbose, ...)
    #[arg(long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a gitpear repo
    Init {
        /// Also share the repo as public; defaults to the current branch
        #[arg(short, long, value_name = "BRANCH", num_args = 0..=1, require_equals = true)]
        share: Option<Option<String>>,
    },

    /// Share a gitpear repo
    Share {
        /// Branch to share, default is the current branch
        #[arg(short, long)]
        branch: Option<String>,
        /// Visibility of the repo
        #[arg(short, long, default_value = "public")]
        visibility: Visibility,
    },

    /// Manage the ACL of a gitpear repo
    Acl {
        /// Action to perform
        #[arg(value_enum, default_value_t = AclAction::List)]
        action: AclAction,
        /// User (`<user>:<role>` when adding) or branch
        name: Option<String>,
        /// Manage users
        #[arg(short, long)]
        user: bool,
        /// Manage protected branches
        #[arg(short, long)]
        branch: bool,
        /// Path to the repo, or a pear:// url
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Stop sharing a gitpear repo
    Unshare {
        /// Path to the repo
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// List gitpear repos, local or of a remote peer
    List {
        /// pear:// url of a remote peer
        url: Option<String>,
        /// List only shared repos
        #[arg(short, long)]
        shared: bool,
    },

    /// Show the public key of this node
    Key,

    /// Start or stop the gitpear daemon
    Daemon {
        /// Start the daemon
        #[arg(short, long)]
        start: bool,
        /// Stop the daemon
        #[arg(short = 'k', long)]
        stop: bool,
        /// Run in the foreground
        #[arg(short, long, requires = "start")]
        attach: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    init_logging(log_level, LogFormat::Compact);

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> commands::Result<()> {
    let home = AppHome::from_env()?;
    let cwd = PathBuf::from(".");
    let mut stdout = std::io::stdout();

    match command {
        Commands::Init { share } => commands::init(&home, &cwd, share).await,
        Commands::Share { branch, visibility } => commands::share(&home, &cwd, branch, visibility).await,
        Commands::Acl {
            action,
            name,
            user,
            branch,
            path,
        } => {
            let target = AclTarget::from_flags(user, branch)?;
            acl::run(&home, action, name.as_deref(), target, &path, &mut stdout).await
        }
        Commands::Unshare { path } => commands::unshare(&home, &path),
        Commands::List { url, shared } => commands::list(&home, url.as_deref(), shared, &mut stdout).await,
        Commands::Key => commands::key(&home, &mut stdout),
        Commands::Daemon { start, stop, attach } => match (start, stop) {
            (true, false) => daemon::start(&home, attach),
            (false, true) => daemon::stop(&home),
            _ => Err(commands::CliError::Usage("use exactly one of --start or --stop".into())),
        },
    }
}

//! CLI argument definitions for Onekey.

use crate::bootstrap::UpgradeMode;
use crate::config::UpdateSource;
use crate::services::ServiceKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("ONEKEY_GIT_COMMIT"),
    ", built ",
    env!("ONEKEY_BUILD_TIMESTAMP"),
    ")"
);

/// Onekey - one-click launcher for the xiaozhi server bundle.
///
/// Run without a subcommand (or with `launch`) for the interactive launcher.
#[derive(Parser, Debug)]
#[command(name = "onekey")]
#[command(author, version, about = "One-click launcher and bootstrapper for the xiaozhi server bundle", long_about = None)]
#[command(long_version = LONG_VERSION)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Bundle root directory (the one containing `runtime/` and `src/`).
    /// Falls back to ONEKEY_ROOT, the executable's directory, then the
    /// current directory.
    #[arg(short = 'C', long = "root", global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Full interactive launch: path check, first-run notes, update check, menu
    Launch,

    /// Show the service menu only (skips first-run notes and the update check)
    Menu,

    /// Start services without the menu
    Start {
        /// What to start
        #[arg(value_enum, default_value = "all")]
        target: StartTarget,

        /// Answer yes to setup prompts (database init, first config)
        #[arg(short, long)]
        yes: bool,
    },

    /// Server config (`.config.yaml`) commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Bundled MySQL commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Check the bundle for updates
    Update {
        #[command(subcommand)]
        command: UpdateCommands,
    },

    /// One-time step markers
    Marker {
        #[command(subcommand)]
        command: MarkerCommands,
    },

    /// Show and acknowledge the first-run notes
    FirstRun {
        /// Acknowledge without prompting
        #[arg(short, long)]
        yes: bool,
    },
}

/// Start target: every service in order, or a single one.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTarget {
    All,
    Mysql,
    Redis,
    Frontend,
    Backend,
    AiServer,
}

impl StartTarget {
    pub fn service(self) -> Option<ServiceKind> {
        match self {
            StartTarget::All => None,
            StartTarget::Mysql => Some(ServiceKind::Mysql),
            StartTarget::Redis => Some(ServiceKind::Redis),
            StartTarget::Frontend => Some(ServiceKind::Frontend),
            StartTarget::Backend => Some(ServiceKind::Backend),
            StartTarget::AiServer => Some(ServiceKind::AiServer),
        }
    }
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Create or repair the server config and set the server secret
    Init {
        /// Secret to write instead of prompting for one
        #[arg(long)]
        secret: Option<String>,

        /// Approve confirmation prompts (upgrade, replacing an existing secret)
        #[arg(short, long)]
        yes: bool,

        /// Never prompt; fail if input would be needed
        #[arg(long)]
        non_interactive: bool,

        /// How to repair a config that lacks the manager-api section
        #[arg(long, value_enum, default_value = "replace")]
        upgrade_mode: UpgradeMode,
    },

    /// Show what config init would do, without changing anything
    Status,

    /// Replace the server secret
    SetSecret {
        /// The new secret
        secret: String,

        /// Accept a secret that fails the shape check without asking
        #[arg(short, long)]
        yes: bool,
    },
}

/// Database subcommands
#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Initialize the data directory, set the root password, create the database
    Init {
        /// Approve wiping a non-empty data directory
        #[arg(short, long)]
        yes: bool,

        /// Seconds to wait for `mysqld --initialize-insecure`
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Write a database password into the backend's datasource config
    WritePassword {
        /// Password to write
        password: String,
    },
}

/// Update subcommands
#[derive(Subcommand, Debug)]
pub enum UpdateCommands {
    /// Compare the local bundle against upstream
    Check {
        /// Where to look (defaults to the configured source)
        #[arg(long, value_enum)]
        source: Option<UpdateSource>,

        /// Report only; don't offer to stop for an update
        #[arg(long)]
        no_prompt: bool,
    },
}

/// Marker subcommands
#[derive(Subcommand, Debug)]
pub enum MarkerCommands {
    /// List markers and whether each step has completed
    List,
}

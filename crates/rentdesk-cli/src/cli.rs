use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rentdesk_core::DatasetKind;

#[derive(Parser)]
#[command(name = "rentdesk")]
#[command(about = "Keep vacation-rental data in sync between this device and the remote store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the sync config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a dataset (remote copy when reachable, local snapshot otherwise)
    Load {
        /// reservations, cleaning-tasks, apartments or prices
        kind: DatasetKind,
        /// Output the full envelope as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace a dataset with JSON read from a file or stdin
    Save {
        kind: DatasetKind,
        /// JSON input file (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Delete one entity from a collection dataset
    Delete {
        kind: DatasetKind,
        /// Entity id
        id: String,
    },
    /// Reconcile local and remote copies
    Sync {
        /// Only this dataset (all datasets when omitted)
        kind: Option<DatasetKind>,
        /// Ask the server for a full rebuild before pulling everything
        #[arg(long, conflicts_with = "kind")]
        force: bool,
    },
    /// Show connection state and per-dataset sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resync periodically until Ctrl-C; press Enter to resync now
    Watch {
        /// Seconds between passive resyncs (config value when omitted)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Page visit analytics
    Visits {
        #[command(subcommand)]
        command: VisitsCommands,
    },
    /// Manage the sync config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum VisitsCommands {
    /// Record a page view
    Track {
        /// Page path, e.g. /calendar
        page: String,
    },
    /// Show visit counts for today, this month and this year
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the config file
    Init {
        /// Remote (PostgREST) base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Remote anon/public key
        #[arg(long, value_name = "KEY")]
        anon_key: Option<String>,
        /// Seconds between passive resyncs
        #[arg(long, value_name = "SECS")]
        resync_interval: Option<u64>,
    },
    /// Print the effective config (key redacted)
    Show,
}

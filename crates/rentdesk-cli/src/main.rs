//! Rentdesk CLI - keep rental data in sync from the command line
//!
//! Every command works offline against the local snapshot store; the remote
//! store is used whenever it is configured and reachable.

mod cli;
mod commands;
mod error;


use std::time::Duration;

use clap::Parser;

use crate::cli::{Cli, Commands, VisitsCommands};
use crate::commands::common::{load_config, open_engine, resolve_config_path, resolve_db_path};
use crate::commands::config::run_config;
use crate::commands::data::{run_delete, run_load, run_save};
use crate::commands::sync::{run_status, run_sync, run_watch};
use crate::commands::visits::{run_visits_stats, run_visits_track};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive: tracing_subscriber::filter::Directive = "rentdesk=info"
        .parse()
        .map_err(|error| CliError::Config(format!("Invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);

    if let Commands::Config { command } = cli.command {
        return run_config(command, &config_path);
    }

    let config = load_config(&config_path)?;
    let remote_configured = config.is_remote_configured();
    let engine = open_engine(&resolve_db_path(cli.db_path), &config)?;

    match cli.command {
        Commands::Load { kind, json } => run_load(&engine, kind, json).await,
        Commands::Save { kind, file } => run_save(&engine, kind, file.as_deref()).await,
        Commands::Delete { kind, id } => run_delete(&engine, kind, &id).await,
        Commands::Sync { kind, force } => run_sync(&engine, kind, force, remote_configured).await,
        Commands::Status { json } => run_status(&engine, remote_configured, json).await,
        Commands::Watch { interval } => {
            let interval = interval.map_or_else(|| config.resync_interval(), Duration::from_secs);
            run_watch(engine, interval).await
        }
        Commands::Visits { command } => match command {
            VisitsCommands::Track { page } => run_visits_track(&engine, &config, &page).await,
            VisitsCommands::Stats { json } => run_visits_stats(&engine, &config, json).await,
        },
        Commands::Config { .. } => Ok(()),
    }
}

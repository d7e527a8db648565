use std::path::Path;

use rentdesk_core::util::normalize_text_option;
use rentdesk_core::SyncConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::{load_config, redact_key};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            remote_url,
            anon_key,
            resync_interval,
        } => {
            let config = init_config(config_path, remote_url, anon_key, resync_interval)?;
            println!("Saved config to {}", config_path.display());
            if !config.is_remote_configured() {
                println!("No remote configured; rentdesk will run local-only.");
            }
            Ok(())
        }
        ConfigCommands::Show => {
            let config = load_config(config_path)?;
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(&redacted(config))?);
            Ok(())
        }
    }
}

/// Merge explicit values into the file (keeping the rest), validate and save
pub fn init_config(
    config_path: &Path,
    remote_url: Option<String>,
    anon_key: Option<String>,
    resync_interval: Option<u64>,
) -> Result<SyncConfig, CliError> {
    let mut config = SyncConfig::load_from_path(config_path)?;

    if let Some(remote_url) = normalize_text_option(remote_url) {
        config.remote_url = Some(remote_url.trim_end_matches('/').to_string());
    }
    if let Some(anon_key) = normalize_text_option(anon_key) {
        config.anon_key = Some(anon_key);
    }
    if let Some(resync_interval) = resync_interval {
        config.resync_interval_secs = resync_interval;
    }

    config.validate()?;
    config.save_to_path(config_path)?;
    Ok(config)
}

fn redacted(mut config: SyncConfig) -> SyncConfig {
    config.anon_key = config.anon_key.as_deref().map(redact_key);
    config
}

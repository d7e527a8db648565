use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] rentdesk_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No JSON input provided")]
    EmptyInput,
    #[error("Entity ID cannot be empty")]
    EmptyEntityId,
    #[error("Page cannot be empty")]
    EmptyPage,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Remote store is not configured. Run `rentdesk config init --remote-url URL --anon-key KEY`, or set RENTDESK_REMOTE_URL and RENTDESK_ANON_KEY."
    )]
    RemoteNotConfigured,
    #[error("Synchronize failed for: {0}")]
    SyncFailed(String),
}

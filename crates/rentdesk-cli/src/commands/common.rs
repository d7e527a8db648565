use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rentdesk_core::db::SqliteSnapshotStore;
use rentdesk_core::remote::{DisconnectedStore, RemoteStore, RestRemoteStore};
use rentdesk_core::sync::{SaveOutcome, SyncReport};
use rentdesk_core::util::compact_text;
use rentdesk_core::{Entity, SyncConfig, SyncEngine};
use serde_json::Value;

use crate::error::CliError;

const DB_PATH_ENV: &str = "RENTDESK_DB_PATH";
const CONFIG_PATH_ENV: &str = "RENTDESK_CONFIG";

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rentdesk")
        .join("rentdesk.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rentdesk")
        .join("config.json")
}

/// Config file plus environment overrides, validated
pub fn load_config(path: &Path) -> Result<SyncConfig, CliError> {
    let config = SyncConfig::load_from_path(path)?.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Open the local store and wire an engine; without a configured remote the
/// engine runs local-only.
pub fn open_engine(db_path: &Path, config: &SyncConfig) -> Result<Arc<SyncEngine>, CliError> {
    let local = Arc::new(SqliteSnapshotStore::open(db_path)?);
    let remote: Arc<dyn RemoteStore> = match (&config.remote_url, &config.anon_key) {
        (Some(url), Some(key)) => Arc::new(RestRemoteStore::new(url.as_str(), key.as_str())?),
        _ => {
            tracing::debug!("No remote configured; running local-only");
            Arc::new(DisconnectedStore)
        }
    };
    Ok(Arc::new(SyncEngine::from_config(config, local, remote)?))
}

/// Read JSON from `file`, or from piped stdin when no file is given
pub fn read_json_input(file: Option<&Path>) -> Result<Value, CliError> {
    let raw = if let Some(path) = file {
        std::fs::read_to_string(path)?
    } else {
        let mut stdin = io::stdin();
        if stdin.is_terminal() {
            return Err(CliError::EmptyInput);
        }
        let mut buffer = String::new();
        stdin.read_to_string(&mut buffer)?;
        buffer
    };
    parse_json_input(&raw)
}

pub fn parse_json_input(raw: &str) -> Result<Value, CliError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CliError::EmptyInput);
    }
    Ok(serde_json::from_str(raw)?)
}

pub fn normalize_entity_id(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyEntityId);
    }
    Ok(id.to_string())
}

/// One line per entity: id, update time and the remaining fields
pub fn format_entity_line(entity: &Entity) -> String {
    let id = entity.id().unwrap_or_else(|| "-".to_string());
    let updated = entity
        .last_updated()
        .map_or_else(|| "-".to_string(), format_sync_timestamp);
    let fields = entity
        .as_map()
        .iter()
        .filter(|(key, _)| key.as_str() != "id")
        .map(|(key, value)| format!("{key}={}", render_value(value)))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{id:<36}  {updated:<23}  {}", compact_text(&fields))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn format_save_outcome(outcome: &SaveOutcome) -> String {
    let local = if outcome.local_written { "saved" } else { "failed" };
    let remote = serde_json::to_value(&outcome.remote)
        .ok()
        .and_then(|value| value.get("status").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    let mut line = format!("local={local} remote={remote}");
    if let Some(warning) = &outcome.warning {
        line.push_str(&format!(" ({warning})"));
    }
    line
}

pub fn format_sync_report(report: &SyncReport) -> String {
    format!(
        "{:<15} entities={} pushed={} local_wins={} remote_wins={} {}",
        report.dataset.as_str(),
        report.entities,
        report.pushed,
        report.local_wins,
        report.remote_wins,
        if report.is_complete() {
            "complete"
        } else if report.local_persisted {
            "local only"
        } else {
            "remote only"
        }
    )
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

/// Keep the first few characters of a key so configs can be compared
pub fn redact_key(key: &str) -> String {
    let visible = key.chars().take(4).collect::<String>();
    format!("{visible}…")
}

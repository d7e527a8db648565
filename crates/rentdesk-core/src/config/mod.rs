//! Sync engine configuration.
//!
//! One JSON file holds the remote endpoint and the resilience tuning. Every
//! field has a default, so a missing file or a partial file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resilience::{MonitorSettings, RetryPolicy};
use crate::util::{is_http_url, normalize_text_option};

pub const REMOTE_URL_ENV: &str = "RENTDESK_REMOTE_URL";
pub const ANON_KEY_ENV: &str = "RENTDESK_ANON_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the PostgREST endpoint
    pub remote_url: Option<String>,
    /// Public (anon) API key sent with every remote call
    pub anon_key: Option<String>,
    /// How long a health probe result is reused
    pub debounce_secs: u64,
    pub probe_timeout_ms: u64,
    /// Consecutive probe failures tolerated before settling offline
    pub failure_ceiling: u32,
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
    /// Per-attempt timeout for interactive reads and writes
    pub read_timeout_ms: u64,
    /// Per-attempt timeout for fire-and-forget analytics writes
    pub best_effort_timeout_ms: u64,
    pub resync_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            anon_key: None,
            debounce_secs: 30,
            probe_timeout_ms: 3000,
            failure_ceiling: 2,
            retry_attempts: 3,
            retry_initial_delay_ms: 1000,
            read_timeout_ms: 4000,
            best_effort_timeout_ms: 1000,
            resync_interval_secs: 30,
            cache_ttl_secs: 300,
            cache_capacity: 20,
        }
    }
}

impl SyncConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                Error::Config(format!(
                    "Failed to create config directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized).map_err(|error| {
            Error::Config(format!("Failed to write config at {}: {error}", path.display()))
        })
    }

    /// Let `RENTDESK_REMOTE_URL` / `RENTDESK_ANON_KEY` override the file
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(REMOTE_URL_ENV).ok(),
            std::env::var(ANON_KEY_ENV).ok(),
        )
    }

    fn with_overrides(mut self, remote_url: Option<String>, anon_key: Option<String>) -> Self {
        if let Some(remote_url) = normalize_text_option(remote_url) {
            self.remote_url = Some(remote_url);
        }
        if let Some(anon_key) = normalize_text_option(anon_key) {
            self.anon_key = Some(anon_key);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.remote_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "remote_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.remote_url.is_some() != self.anon_key.is_some() {
            return Err(Error::Config(
                "remote_url and anon_key must be set together".to_string(),
            ));
        }

        let non_zero = [
            ("retry_attempts", u64::from(self.retry_attempts)),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("best_effort_timeout_ms", self.best_effort_timeout_ms),
            ("resync_interval_secs", self.resync_interval_secs),
            ("cache_capacity", u64::try_from(self.cache_capacity).unwrap_or(u64::MAX)),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{field} must be greater than zero")));
        }
        Ok(())
    }

    /// Whether a remote endpoint and key are both present
    pub const fn is_remote_configured(&self) -> bool {
        self.remote_url.is_some() && self.anon_key.is_some()
    }

    pub const fn interactive_policy(&self) -> RetryPolicy {
        RetryPolicy::interactive()
            .with_attempts(self.retry_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_attempt_timeout(Duration::from_millis(self.read_timeout_ms))
    }

    pub const fn best_effort_policy(&self) -> RetryPolicy {
        RetryPolicy::best_effort()
            .with_attempt_timeout(Duration::from_millis(self.best_effort_timeout_ms))
    }

    pub const fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            debounce: Duration::from_secs(self.debounce_secs),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            failure_ceiling: self.failure_ceiling,
        }
    }

    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    fn normalize(&mut self) {
        self.remote_url = normalize_text_option(self.remote_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.anon_key = normalize_text_option(self.anon_key.take());
    }
}

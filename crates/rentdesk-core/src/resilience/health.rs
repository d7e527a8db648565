//! Remote reachability monitor.
//!
//! State machine: `Unknown -> Probing -> {Available, Unavailable}`, re-entered
//! on every probe. Probes are debounced: a result younger than the debounce
//! window is returned without touching the network. Failures below the
//! ceiling are not cached, so the next caller probes again; once the ceiling
//! is exceeded the monitor settles into `Unavailable` for a full window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::util::unix_millis_now;

/// Lightweight "is the remote up" call
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), String>;
}

/// Where the monitor is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unknown,
    Probing,
    Available,
    Unavailable,
}

/// Snapshot of the connection state, read-only for everyone but the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub available: bool,
    /// Completion time of the last probe (Unix ms)
    pub last_probe_at: Option<i64>,
    pub consecutive_failures: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Unknown,
            available: false,
            last_probe_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Monitor tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// How long a probe result is reused
    pub debounce: Duration,
    /// Upper bound on a single probe
    pub probe_timeout: Duration,
    /// Failures tolerated before settling into `Unavailable`
    pub failure_ceiling: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            failure_ceiling: 2,
        }
    }
}

/// Debounced remote health monitor
pub struct ConnectionMonitor {
    probe: Arc<dyn HealthProbe>,
    settings: MonitorSettings,
    state: Mutex<ConnectionState>,
    /// Held for the duration of a probe; stores when the cached result was settled
    settled_at: tokio::sync::Mutex<Option<Instant>>,
}

impl ConnectionMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, settings: MonitorSettings) -> Self {
        Self {
            probe,
            settings,
            state: Mutex::new(ConnectionState::default()),
            settled_at: tokio::sync::Mutex::new(None),
        }
    }

    /// Return remote availability, probing only when the cached result is stale.
    pub async fn check_availability(&self) -> bool {
        let mut settled_at = self.settled_at.lock().await;
        if let Some(at) = *settled_at {
            if at.elapsed() < self.settings.debounce {
                let available = self.is_available();
                debug!(available, "Using debounced connection state");
                return available;
            }
        }
        self.run_probe(&mut settled_at).await
    }

    /// Probe immediately, ignoring the debounce window.
    pub async fn force_recheck(&self) -> bool {
        let mut settled_at = self.settled_at.lock().await;
        self.run_probe(&mut settled_at).await
    }

    /// Last known availability (never probes)
    pub fn is_available(&self) -> bool {
        self.state().available
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |state| state.clone())
    }

    async fn run_probe(&self, settled_at: &mut Option<Instant>) -> bool {
        self.update(|state| state.status = ConnectionStatus::Probing);

        let outcome = match timeout(self.settings.probe_timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "probe timed out after {:?}",
                self.settings.probe_timeout
            )),
        };
        let now_ms = unix_millis_now();

        match outcome {
            Ok(()) => {
                let previous = self.update(|state| {
                    let previous = state.available;
                    state.status = ConnectionStatus::Available;
                    state.available = true;
                    state.consecutive_failures = 0;
                    state.last_probe_at = Some(now_ms);
                    previous
                });
                if !previous {
                    info!("Remote store is reachable");
                }
                *settled_at = Some(Instant::now());
                true
            }
            Err(error) => {
                let failures = self.update(|state| {
                    state.status = ConnectionStatus::Unavailable;
                    state.available = false;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    state.last_probe_at = Some(now_ms);
                    state.consecutive_failures
                });
                if failures > self.settings.failure_ceiling {
                    warn!(
                        consecutive_failures = failures,
                        error = %error,
                        "Remote store unreachable; settling offline until next window"
                    );
                    *settled_at = Some(Instant::now());
                } else {
                    warn!(
                        consecutive_failures = failures,
                        error = %error,
                        "Remote probe failed"
                    );
                    *settled_at = None;
                }
                false
            }
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut ConnectionState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }
}

//! Passive resync: a periodic ticker and a "became active" signal, both
//! feeding `synchronize_all`.
//!
//! Runs are sequential within the loop, so ticks never stack; a tick that
//! arrives while a run is still going is skipped. The host decides what
//! "became active" means (window focus, app resume, a keypress).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;

/// Default period between passive resyncs
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a running resync loop
pub struct ResyncHandle {
    active: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResyncHandle {
    /// Trigger an immediate resync (the app became visible again)
    pub fn became_active(&self) {
        self.active.notify_one();
    }

    /// Stop the loop, abandoning any run in progress, and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            warn!(error = %error, "Resync task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Start the passive resync loop on the current runtime.
///
/// The first run happens immediately.
pub fn spawn(engine: Arc<SyncEngine>, interval: Duration) -> ResyncHandle {
    let active = Arc::new(Notify::new());
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(engine, interval, active.clone(), shutdown_rx));

    ResyncHandle {
        active,
        shutdown,
        task,
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    interval: Duration,
    active: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "Passive resync started");

    loop {
        let trigger = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            () = active.notified() => "became_active",
            _ = ticker.tick() => "interval",
        };

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            summary = engine.synchronize_all() => {
                debug!(
                    trigger,
                    succeeded = summary.succeeded.len(),
                    failed = summary.failed.len(),
                    skipped = summary.skipped.len(),
                    "Passive resync finished"
                );
            }
        }
    }

    info!("Passive resync stopped");
}

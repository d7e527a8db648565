//! Storage synchronization engine.
//!
//! The engine fronts the local snapshot store and the remote gateway with a
//! single `load`/`save`/`synchronize` contract:
//!
//! - `load` prefers the remote copy when it is reachable and writes it
//!   through to the local store; otherwise it serves the local snapshot.
//! - `save` always writes locally first, then pushes to the remote when it
//!   is reachable. The write is accepted if either backend took it.
//! - `synchronize` merges both snapshots with last-writer-wins per entity and
//!   persists the result to both sides.
//!
//! Transient remote failures are absorbed and logged; only local storage
//! failures (and a save that neither backend accepted) reach the caller.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::db::{LocalStore, SqliteSnapshotStore};
use crate::error::{Error, Result};
use crate::models::{DatasetKind, DeviceIdentity, Entity, Envelope, Payload};
use crate::remote::{RemoteError, RemoteGateway, RemoteResult, RemoteStore};
use crate::resilience::{ConnectionMonitor, ConnectionState};
use crate::util::unix_millis_now;

use super::bus::{ChangeBus, ChangeEvent, ChangeReason, Subscription};
use super::merge::merge;

/// Warning surfaced when only the local store accepted a write
pub const LOCAL_ONLY_WARNING: &str = "data saved on this device only";

/// Warning surfaced when only the remote store accepted a write
pub const REMOTE_ONLY_WARNING: &str = "data saved remotely but not on this device";

/// What happened to the remote half of a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteWrite {
    /// The remote accepted every pushed entity
    Written { entities: usize },
    /// The remote was reachable but rejected the write after retries
    Failed { reason: String },
    /// The remote was not reachable, so nothing was attempted
    Offline,
}

impl RemoteWrite {
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }

    fn reason(&self) -> String {
        match self {
            Self::Written { .. } => String::new(),
            Self::Failed { reason } => reason.clone(),
            Self::Offline => "remote store unreachable".to_string(),
        }
    }
}

/// Result of `save` and `remove`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub local_written: bool,
    pub remote: RemoteWrite,
    /// Non-blocking message for the user when only one backend took the write
    pub warning: Option<String>,
}

impl SaveOutcome {
    /// True if at least one backend accepted the write
    pub const fn is_accepted(&self) -> bool {
        self.local_written || self.remote.is_written()
    }
}

/// Counts from one completed merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dataset: DatasetKind,
    /// Entities in the merged snapshot
    pub entities: usize,
    /// Entities sent to the remote
    pub pushed: usize,
    pub local_wins: usize,
    pub remote_wins: usize,
    pub local_persisted: bool,
    pub remote_persisted: bool,
}

impl SyncReport {
    /// Both sides now hold the merged snapshot
    pub const fn is_complete(&self) -> bool {
        self.local_persisted && self.remote_persisted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another synchronize for the same dataset was already running
    Skipped,
    Merged(SyncReport),
}

/// Settle-all summary of `synchronize_all`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub succeeded: Vec<DatasetKind>,
    pub failed: Vec<DatasetKind>,
    /// Datasets whose synchronize was already in flight
    pub skipped: Vec<DatasetKind>,
}

impl SyncSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes the dataset from the in-flight set when dropped
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<DatasetKind>>,
    kind: DatasetKind,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.kind);
    }
}

pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    gateway: Arc<RemoteGateway>,
    monitor: Arc<ConnectionMonitor>,
    identity: DeviceIdentity,
    bus: ChangeBus,
    in_flight: Mutex<HashSet<DatasetKind>>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        gateway: Arc<RemoteGateway>,
        monitor: Arc<ConnectionMonitor>,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            local,
            gateway,
            monitor,
            identity,
            bus: ChangeBus::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Wire an engine from configuration.
    ///
    /// The monitor probes through the same gateway the engine writes through.
    pub fn from_config(
        config: &SyncConfig,
        local: Arc<SqliteSnapshotStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        config.validate()?;
        let identity = local.device_identity()?;
        let gateway = Arc::new(RemoteGateway::with_policies(
            remote,
            config.interactive_policy(),
            config.best_effort_policy(),
        ));
        let monitor = Arc::new(ConnectionMonitor::new(
            gateway.clone(),
            config.monitor_settings(),
        ));
        Ok(Self::new(local, gateway, monitor, identity))
    }

    pub fn gateway(&self) -> Arc<RemoteGateway> {
        self.gateway.clone()
    }

    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    /// Load the current snapshot of a dataset.
    ///
    /// Returns `Ok(None)` when neither side has data yet. Errors only when
    /// the remote is unusable and the local snapshot cannot be read.
    pub async fn load(&self, kind: DatasetKind) -> Result<Option<Envelope>> {
        if self.monitor.check_availability().await {
            match self.gateway.list(kind).await {
                Ok(Some(remote)) => return Ok(Some(self.write_through(kind, remote))),
                Ok(None) => {
                    debug!(dataset = %kind, "Remote has no snapshot; serving local copy");
                }
                Err(error) => {
                    warn!(
                        dataset = %kind,
                        operation = "load",
                        error = %error,
                        "Remote load failed; falling back to local snapshot"
                    );
                }
            }
        } else {
            debug!(dataset = %kind, "Remote unavailable; serving local snapshot");
        }

        self.local.read(kind).inspect_err(|error| {
            error!(dataset = %kind, operation = "load", error = %error, "Local snapshot unreadable");
        })
    }

    /// Persist a fresh remote snapshot locally and return it.
    ///
    /// Local writes the remote has not seen yet are merged in rather than
    /// overwritten; they stay flagged until a synchronize pushes them.
    fn write_through(&self, kind: DatasetKind, remote: Payload) -> Envelope {
        let payload = if self.local.has_pending_changes(kind).unwrap_or(false) {
            let local = self.local.read(kind).ok().flatten();
            merge(local.as_ref().map(|envelope| &envelope.payload), Some(&remote))
                .payload
                .unwrap_or(remote)
        } else {
            remote
        };

        let envelope = self.stamp(kind, payload);
        if let Err(error) = self.local.write(kind, &envelope) {
            warn!(
                dataset = %kind,
                operation = "load",
                error = %error,
                "Could not cache remote snapshot locally"
            );
        }
        envelope
    }

    /// Save a dataset snapshot to both backends.
    ///
    /// The local write happens first and unconditionally. The remote write is
    /// attempted only when the remote is reachable.
    pub async fn save(&self, kind: DatasetKind, payload: Payload) -> Result<SaveOutcome> {
        if !payload.matches(kind) {
            return Err(Error::InvalidInput(format!(
                "{kind} expects a {} payload",
                if kind.is_collection() { "collection" } else { "single object" }
            )));
        }

        let had_pending = self.local.has_pending_changes(kind).unwrap_or(true);
        let previous = self.local.read(kind).ok().flatten();
        let payload = carry_singleton_id(payload, previous.as_ref().map(|previous| &previous.payload));
        let envelope = Envelope::new(kind, payload, &self.identity)
            .following(previous.as_ref().map(|previous| previous.last_updated));

        let local_result = self.local.write(kind, &envelope);
        let local_written = match &local_result {
            Ok(()) => {
                self.flag_pending(kind, true);
                true
            }
            Err(error) => {
                error!(dataset = %kind, operation = "save", error = %error, "Local write failed");
                false
            }
        };

        let mut changed = if had_pending || !local_written {
            envelope.payload.entities().iter().cloned().enumerate().collect()
        } else {
            changed_entities(previous.as_ref().map(|previous| &previous.payload), &envelope.payload)
        };

        let remote = if self.monitor.check_availability().await {
            self.anchor_to_remote_row(kind, &mut changed).await;
            match self.push(kind, &changed).await {
                Ok(stored) => {
                    if local_written {
                        self.adopt_remote_rows(kind, envelope.payload.clone(), &changed, stored);
                        self.flag_pending(kind, false);
                    }
                    RemoteWrite::Written {
                        entities: changed.len(),
                    }
                }
                Err(error) => {
                    warn!(
                        dataset = %kind,
                        operation = "save",
                        error = %error,
                        "Remote write failed; keeping local copy"
                    );
                    RemoteWrite::Failed {
                        reason: error.to_string(),
                    }
                }
            }
        } else {
            RemoteWrite::Offline
        };

        if let Err(local_error) = local_result {
            if !remote.is_written() {
                return Err(Error::BothBackendsFailed {
                    dataset: kind,
                    local: local_error.to_string(),
                    remote: remote.reason(),
                });
            }
        }

        let warning = match (local_written, remote.is_written()) {
            (true, false) => Some(LOCAL_ONLY_WARNING.to_string()),
            (false, true) => Some(REMOTE_ONLY_WARNING.to_string()),
            _ => None,
        };

        info!(
            dataset = %kind,
            local_written,
            remote_written = remote.is_written(),
            "Saved dataset"
        );
        self.notify(kind, ChangeReason::Saved, Some(envelope.last_updated));

        Ok(SaveOutcome {
            local_written,
            remote,
            warning,
        })
    }

    /// Delete one entity from a collection dataset on both backends
    pub async fn remove(&self, kind: DatasetKind, id: &str) -> Result<SaveOutcome> {
        if !kind.is_collection() {
            return Err(Error::InvalidInput(format!(
                "{kind} is a single object; save a replacement instead"
            )));
        }

        let current = self.local.read(kind)?;
        let remaining: Vec<Entity> = current
            .as_ref()
            .map(|envelope| envelope.payload.entities().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter(|entity| entity.id().as_deref() != Some(id))
            .collect();
        let envelope = Envelope::new(kind, Payload::Collection(remaining), &self.identity)
            .following(current.as_ref().map(|current| current.last_updated));
        self.local.write(kind, &envelope)?;

        let remote = if self.monitor.check_availability().await {
            match self.gateway.delete(kind, id).await {
                Ok(()) => RemoteWrite::Written { entities: 1 },
                Err(error) => {
                    warn!(
                        dataset = %kind,
                        operation = "remove",
                        id,
                        error = %error,
                        "Remote delete failed"
                    );
                    RemoteWrite::Failed {
                        reason: error.to_string(),
                    }
                }
            }
        } else {
            RemoteWrite::Offline
        };

        let warning = (!remote.is_written()).then(|| LOCAL_ONLY_WARNING.to_string());
        self.notify(kind, ChangeReason::Removed, Some(envelope.last_updated));

        Ok(SaveOutcome {
            local_written: true,
            remote,
            warning,
        })
    }

    /// Reconcile the local and remote snapshots of one dataset.
    ///
    /// Returns `Skipped` without doing anything if a synchronize for the same
    /// dataset is already running.
    pub async fn synchronize(&self, kind: DatasetKind) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin(kind) else {
            info!(dataset = %kind, "Synchronize already in flight; skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let local = match self.local.read(kind) {
            Ok(envelope) => envelope.map(|envelope| envelope.payload),
            Err(error) => {
                warn!(
                    dataset = %kind,
                    operation = "synchronize",
                    error = %error,
                    "Local snapshot unreadable; merging remote only"
                );
                None
            }
        };

        let (remote, remote_reachable) = if self.monitor.check_availability().await {
            match self.gateway.list(kind).await {
                Ok(remote) => (remote, true),
                Err(error) => {
                    warn!(
                        dataset = %kind,
                        operation = "synchronize",
                        error = %error,
                        "Remote snapshot unavailable; merging local only"
                    );
                    (None, false)
                }
            }
        } else {
            (None, false)
        };

        let report = merge(local.as_ref(), remote.as_ref());
        let mut merged = report.payload;

        let mut pushed = 0;
        let remote_persisted = if remote_reachable {
            let to_push: Vec<(usize, Entity)> = merged
                .as_ref()
                .map(|payload| {
                    payload
                        .entities()
                        .iter()
                        .cloned()
                        .enumerate()
                        .filter(|(_, entity)| report.to_push.contains(entity))
                        .collect()
                })
                .unwrap_or_default();

            match self.push(kind, &to_push).await {
                Ok(stored) => {
                    pushed = stored.len();
                    if let Some(payload) = merged.take() {
                        merged = Some(replace_rows(payload, &to_push, stored));
                    }
                    true
                }
                Err(error) => {
                    warn!(
                        dataset = %kind,
                        operation = "synchronize",
                        error = %error,
                        "Could not push merged entities"
                    );
                    false
                }
            }
        } else {
            false
        };

        let entities = merged.as_ref().map_or(0, Payload::len);
        let mut last_updated = None;
        let local_persisted = match merged {
            Some(payload) => {
                let envelope = self.stamp(kind, payload);
                match self.local.write(kind, &envelope) {
                    Ok(()) => {
                        last_updated = Some(envelope.last_updated);
                        true
                    }
                    Err(error) => {
                        error!(
                            dataset = %kind,
                            operation = "synchronize",
                            error = %error,
                            "Could not persist merged snapshot locally"
                        );
                        false
                    }
                }
            }
            // Nothing on either side: the local store is trivially in sync
            None => true,
        };

        if !local_persisted && !remote_persisted {
            return Err(Error::BothBackendsFailed {
                dataset: kind,
                local: "merged snapshot could not be written".to_string(),
                remote: if remote_reachable {
                    "merged entities could not be pushed".to_string()
                } else {
                    "remote store unreachable".to_string()
                },
            });
        }

        if local_persisted && remote_persisted {
            if let Err(error) = self.local.mark_synced(kind, unix_millis_now()) {
                warn!(dataset = %kind, error = %error, "Could not record sync time");
            }
            self.flag_pending(kind, false);
        }

        let sync_report = SyncReport {
            dataset: kind,
            entities,
            pushed,
            local_wins: report.local_wins,
            remote_wins: report.remote_wins,
            local_persisted,
            remote_persisted,
        };
        info!(
            dataset = %kind,
            entities,
            pushed,
            local_wins = sync_report.local_wins,
            remote_wins = sync_report.remote_wins,
            complete = sync_report.is_complete(),
            "Synchronized dataset"
        );
        self.notify(kind, ChangeReason::Synchronized, last_updated);

        Ok(SyncOutcome::Merged(sync_report))
    }

    /// Synchronize every dataset, collecting failures instead of stopping at the first
    pub async fn synchronize_all(&self) -> SyncSummary {
        let results = join_all(
            DatasetKind::ALL
                .into_iter()
                .map(|kind| async move { (kind, self.synchronize(kind).await) }),
        )
        .await;

        let mut summary = SyncSummary::default();
        for (kind, result) in results {
            match result {
                Ok(SyncOutcome::Merged(_)) => summary.succeeded.push(kind),
                Ok(SyncOutcome::Skipped) => summary.skipped.push(kind),
                Err(error) => {
                    warn!(dataset = %kind, error = %error, "Synchronize failed");
                    summary.failed.push(kind);
                }
            }
        }
        summary
    }

    /// Ask the server to rebuild, then pull everything again
    pub async fn force_full_resync(&self) -> Result<SyncSummary> {
        if !self.monitor.force_recheck().await {
            return Err(Error::Remote(RemoteError::Unavailable(
                "remote store unreachable".to_string(),
            )));
        }
        self.gateway.force_full_resync().await?;
        info!("Remote full resync requested");
        Ok(self.synchronize_all().await)
    }

    /// Re-probe the remote immediately, ignoring the debounce window
    pub async fn test_connection(&self) -> bool {
        self.monitor.force_recheck().await
    }

    pub fn subscribe<F>(&self, kind: DatasetKind, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, callback)
    }

    /// When `kind` last completed a full synchronize (Unix ms)
    pub fn last_synced_at(&self, kind: DatasetKind) -> Result<Option<i64>> {
        self.local.last_synced_at(kind)
    }

    /// Local snapshot without consulting the remote
    pub fn local_snapshot(&self, kind: DatasetKind) -> Result<Option<Envelope>> {
        self.local.read(kind)
    }

    pub fn has_pending_changes(&self, kind: DatasetKind) -> Result<bool> {
        self.local.has_pending_changes(kind)
    }

    fn try_begin(&self, kind: DatasetKind) -> Option<InFlightGuard<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
        inserted.then_some(InFlightGuard {
            in_flight: &self.in_flight,
            kind,
        })
    }

    /// Upsert entities in order, stopping at the first failure
    async fn push(
        &self,
        kind: DatasetKind,
        entities: &[(usize, Entity)],
    ) -> RemoteResult<Vec<Entity>> {
        let mut stored = Vec::with_capacity(entities.len());
        for (_, entity) in entities {
            stored.push(self.gateway.upsert(kind, entity).await?);
        }
        Ok(stored)
    }

    /// Give an id-less singleton the id of the row the remote already holds,
    /// so the push updates that row instead of creating a second one
    async fn anchor_to_remote_row(&self, kind: DatasetKind, changed: &mut [(usize, Entity)]) {
        if kind.is_collection() {
            return;
        }
        let Some((_, entity)) = changed.first_mut() else {
            return;
        };
        if entity.id().is_some() {
            return;
        }
        match self.gateway.list(kind).await {
            Ok(Some(Payload::Single(row))) => {
                if let Some(id) = row.id() {
                    debug!(dataset = %kind, id = %id, "Reusing remote row id");
                    *entity = std::mem::take(entity).with_id(id);
                }
            }
            Ok(_) => {}
            Err(error) => {
                debug!(dataset = %kind, error = %error, "Could not look up remote row id");
            }
        }
    }

    /// Rewrite the local snapshot with the rows the remote returned
    fn adopt_remote_rows(
        &self,
        kind: DatasetKind,
        payload: Payload,
        pushed: &[(usize, Entity)],
        stored: Vec<Entity>,
    ) {
        let unchanged = stored
            .iter()
            .zip(pushed)
            .all(|(row, (position, _))| payload.entities().get(*position) == Some(row));
        if unchanged {
            return;
        }
        let envelope = self.stamp(kind, replace_rows(payload, pushed, stored));
        if let Err(error) = self.local.write(kind, &envelope) {
            warn!(dataset = %kind, error = %error, "Could not store server-assigned fields");
        }
    }

    /// Wrap a payload stamped strictly after the snapshot it replaces
    fn stamp(&self, kind: DatasetKind, payload: Payload) -> Envelope {
        let previous = self
            .local
            .read(kind)
            .ok()
            .flatten()
            .map(|envelope| envelope.last_updated);
        Envelope::new(kind, payload, &self.identity).following(previous)
    }

    fn flag_pending(&self, kind: DatasetKind, pending: bool) {
        if let Err(error) = self.local.set_pending_changes(kind, pending) {
            warn!(dataset = %kind, pending, error = %error, "Could not update pending flag");
        }
    }

    fn notify(&self, kind: DatasetKind, reason: ChangeReason, last_updated: Option<i64>) {
        self.bus.notify(&ChangeEvent {
            dataset: kind,
            reason,
            last_updated,
        });
    }
}

/// An id-less singleton takes over the id of the snapshot it replaces
fn carry_singleton_id(payload: Payload, previous: Option<&Payload>) -> Payload {
    match (payload, previous) {
        (Payload::Single(entity), Some(Payload::Single(previous))) if entity.id().is_none() => {
            match previous.id() {
                Some(id) => Payload::Single(entity.with_id(id)),
                None => Payload::Single(entity),
            }
        }
        (payload, _) => payload,
    }
}

/// Entities of `next` (with their positions) that `previous` does not hold verbatim
fn changed_entities(previous: Option<&Payload>, next: &Payload) -> Vec<(usize, Entity)> {
    let previous = previous.map(Payload::entities).unwrap_or_default();
    next.entities()
        .iter()
        .enumerate()
        .filter(|(_, entity)| !previous.contains(entity))
        .map(|(position, entity)| (position, entity.clone()))
        .collect()
}

/// Swap the entities at the pushed positions for the stored rows
fn replace_rows(payload: Payload, pushed: &[(usize, Entity)], stored: Vec<Entity>) -> Payload {
    match payload {
        Payload::Collection(mut entities) => {
            for ((position, _), row) in pushed.iter().zip(stored) {
                if let Some(slot) = entities.get_mut(*position) {
                    *slot = row;
                }
            }
            Payload::Collection(entities)
        }
        Payload::Single(entity) => Payload::Single(stored.into_iter().next().unwrap_or(entity)),
    }
}

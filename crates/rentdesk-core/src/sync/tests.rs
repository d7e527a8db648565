use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::scheduler;
use super::*;
use crate::db::{LocalStore, SqliteSnapshotStore};
use crate::error::{Error, Result};
use crate::models::{DatasetKind, Entity, Envelope, Payload};
use crate::remote::{MemoryRemoteStore, RemoteGateway};
use crate::resilience::{ConnectionMonitor, MonitorSettings, RetryPolicy};

/// Local store whose writes fail for selected datasets
struct FlakyLocalStore {
    inner: SqliteSnapshotStore,
    broken: HashSet<DatasetKind>,
}

impl LocalStore for FlakyLocalStore {
    fn read(&self, kind: DatasetKind) -> Result<Option<Envelope>> {
        self.inner.read(kind)
    }

    fn write(&self, kind: DatasetKind, envelope: &Envelope) -> Result<()> {
        if self.broken.contains(&kind) {
            return Err(Error::Database("disk quota exceeded".to_string()));
        }
        self.inner.write(kind, envelope)
    }

    fn last_synced_at(&self, kind: DatasetKind) -> Result<Option<i64>> {
        self.inner.last_synced_at(kind)
    }

    fn mark_synced(&self, kind: DatasetKind, at: i64) -> Result<()> {
        self.inner.mark_synced(kind, at)
    }

    fn has_pending_changes(&self, kind: DatasetKind) -> Result<bool> {
        self.inner.has_pending_changes(kind)
    }

    fn set_pending_changes(&self, kind: DatasetKind, pending: bool) -> Result<()> {
        self.inner.set_pending_changes(kind, pending)
    }
}

struct Fixture {
    engine: Arc<SyncEngine>,
    remote: Arc<MemoryRemoteStore>,
    local: Arc<dyn LocalStore>,
}

fn fixture(remote: MemoryRemoteStore) -> Fixture {
    let local = SqliteSnapshotStore::open_in_memory().unwrap();
    let identity = local.device_identity().unwrap();
    build(Arc::new(local), remote, identity)
}

/// Fixture whose local writes fail for `broken`; `seed` is stored beforehand
fn flaky_fixture(
    remote: MemoryRemoteStore,
    broken: &[DatasetKind],
    seed: Vec<(DatasetKind, Payload)>,
) -> Fixture {
    let inner = SqliteSnapshotStore::open_in_memory().unwrap();
    let identity = inner.device_identity().unwrap();
    for (kind, payload) in seed {
        inner
            .write(kind, &Envelope::new(kind, payload, &identity))
            .unwrap();
    }
    let local = FlakyLocalStore {
        inner,
        broken: broken.iter().copied().collect(),
    };
    build(Arc::new(local), remote, identity)
}

fn build(
    local: Arc<dyn LocalStore>,
    remote: MemoryRemoteStore,
    identity: crate::models::DeviceIdentity,
) -> Fixture {
    let remote = Arc::new(remote);
    let gateway = Arc::new(RemoteGateway::with_policies(
        remote.clone(),
        RetryPolicy::test(),
        RetryPolicy::best_effort(),
    ));
    // Zero debounce: every availability check sees the store's current state
    let monitor = Arc::new(ConnectionMonitor::new(
        gateway.clone(),
        MonitorSettings {
            debounce: Duration::ZERO,
            probe_timeout: Duration::from_millis(200),
            failure_ceiling: 2,
        },
    ));
    let engine = Arc::new(SyncEngine::new(local.clone(), gateway, monitor, identity));
    Fixture {
        engine,
        remote,
        local,
    }
}

fn entity(id: &str, last_updated: i64) -> Entity {
    Entity::new().with_id(id).with_last_updated(last_updated)
}

fn collection(entities: Vec<Entity>) -> Payload {
    Payload::Collection(entities)
}

fn seed_local(fixture: &Fixture, kind: DatasetKind, payload: Payload) {
    let envelope = Envelope::new(kind, payload, fixture.engine.identity());
    fixture.local.write(kind, &envelope).unwrap();
}

fn local_payload(fixture: &Fixture, kind: DatasetKind) -> Option<Payload> {
    fixture
        .local
        .read(kind)
        .unwrap()
        .map(|envelope| envelope.payload)
}

fn counter(engine: &SyncEngine, kind: DatasetKind, reason: ChangeReason) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let _subscription = engine.subscribe(kind, {
        let hits = hits.clone();
        move |event| {
            if event.reason == reason {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    hits
}

#[tokio::test]
async fn remote_newer_entity_wins_and_remote_only_is_kept() {
    let fixture = fixture(MemoryRemoteStore::new().with_entities(
        DatasetKind::Reservations,
        vec![entity("r1", 200), entity("r2", 50)],
    ));
    seed_local(
        &fixture,
        DatasetKind::Reservations,
        collection(vec![entity("r1", 100)]),
    );

    let outcome = fixture
        .engine
        .synchronize(DatasetKind::Reservations)
        .await
        .unwrap();

    let expected = collection(vec![entity("r1", 200), entity("r2", 50)]);
    assert_eq!(local_payload(&fixture, DatasetKind::Reservations), Some(expected));
    let SyncOutcome::Merged(report) = outcome else {
        panic!("expected a merge");
    };
    assert_eq!(report.pushed, 0);
    assert_eq!(report.remote_wins, 1);
    assert!(report.is_complete());
    assert!(fixture
        .engine
        .last_synced_at(DatasetKind::Reservations)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn local_newer_entity_is_pushed_to_remote() {
    let fixture = fixture(MemoryRemoteStore::new().with_entities(
        DatasetKind::Reservations,
        vec![entity("r1", 200)],
    ));
    let edited = entity("r1", 300).with_field("guest", "Ana");
    seed_local(
        &fixture,
        DatasetKind::Reservations,
        collection(vec![edited.clone(), entity("r9", 5)]),
    );

    fixture
        .engine
        .synchronize(DatasetKind::Reservations)
        .await
        .unwrap();

    let remote = fixture.remote.entities(DatasetKind::Reservations);
    assert_eq!(remote, vec![edited, entity("r9", 5)]);
    assert_eq!(fixture.remote.calls("update"), 2);
    assert_eq!(fixture.remote.calls("create"), 1);
}

#[tokio::test]
async fn save_degrades_to_local_when_remote_unreachable() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture.remote.set_online(false);
    let reservations = collection(vec![entity("r1", 10).with_field("guest", "Ana")]);

    let outcome = fixture
        .engine
        .save(DatasetKind::Reservations, reservations.clone())
        .await
        .unwrap();

    assert!(outcome.is_accepted());
    assert!(outcome.local_written);
    assert_eq!(outcome.remote, RemoteWrite::Offline);
    assert_eq!(outcome.warning.as_deref(), Some(LOCAL_ONLY_WARNING));

    let loaded = fixture
        .engine
        .load(DatasetKind::Reservations)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.payload, reservations);
    assert!(fixture
        .engine
        .has_pending_changes(DatasetKind::Reservations)
        .unwrap());
}

#[tokio::test]
async fn apartments_saved_offline_load_back() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture.remote.set_online(false);
    let apartments = collection(vec![
        Entity::new().with_id("a1").with_field("name", "Sea View"),
        Entity::new().with_id("a2").with_field("name", "Old Town Loft"),
    ]);

    let outcome = fixture
        .engine
        .save(DatasetKind::Apartments, apartments.clone())
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let loaded = fixture.engine.load(DatasetKind::Apartments).await.unwrap();
    assert_eq!(loaded.map(|envelope| envelope.payload), Some(apartments));
}

#[tokio::test]
async fn load_with_nothing_anywhere_is_none() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture.remote.set_online(false);
    assert!(fixture.engine.load(DatasetKind::Prices).await.unwrap().is_none());
}

#[tokio::test]
async fn load_writes_remote_snapshot_through_to_local() {
    let remote_rows = vec![entity("c1", 1), entity("c2", 2)];
    let fixture = fixture(
        MemoryRemoteStore::new().with_entities(DatasetKind::CleaningTasks, remote_rows.clone()),
    );

    let loaded = fixture
        .engine
        .load(DatasetKind::CleaningTasks)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.payload, collection(remote_rows.clone()));
    assert_eq!(
        local_payload(&fixture, DatasetKind::CleaningTasks),
        Some(collection(remote_rows))
    );
}

#[tokio::test]
async fn malformed_remote_response_falls_back_to_local() {
    let fixture = fixture(MemoryRemoteStore::new());
    let local = collection(vec![entity("c1", 1)]);
    seed_local(&fixture, DatasetKind::CleaningTasks, local.clone());
    fixture
        .remote
        .set_raw_list(DatasetKind::CleaningTasks, serde_json::json!({"rows": "nope"}));

    let loaded = fixture
        .engine
        .load(DatasetKind::CleaningTasks)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.payload, local);
    assert_eq!(fixture.remote.calls("list"), 3);
}

#[tokio::test]
async fn load_keeps_unpushed_local_writes() {
    let fixture = fixture(
        MemoryRemoteStore::new().with_entities(DatasetKind::Reservations, vec![entity("r1", 1)]),
    );
    fixture.remote.set_online(false);
    fixture
        .engine
        .save(DatasetKind::Reservations, collection(vec![entity("l1", 5)]))
        .await
        .unwrap();

    fixture.remote.set_online(true);
    let loaded = fixture
        .engine
        .load(DatasetKind::Reservations)
        .await
        .unwrap()
        .unwrap();

    let ids: Vec<String> = loaded.payload.entities().iter().filter_map(Entity::id).collect();
    assert_eq!(ids, vec!["r1", "l1"]);
    assert!(fixture
        .engine
        .has_pending_changes(DatasetKind::Reservations)
        .unwrap());
}

#[tokio::test]
async fn offline_save_reaches_remote_on_next_synchronize() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture.remote.set_online(false);
    let reservation = entity("r1", 10);
    fixture
        .engine
        .save(DatasetKind::Reservations, collection(vec![reservation.clone()]))
        .await
        .unwrap();

    fixture.remote.set_online(true);
    let outcome = fixture
        .engine
        .synchronize(DatasetKind::Reservations)
        .await
        .unwrap();

    assert!(matches!(outcome, SyncOutcome::Merged(ref report) if report.pushed == 1));
    assert_eq!(fixture.remote.entities(DatasetKind::Reservations), vec![reservation]);
    assert!(!fixture
        .engine
        .has_pending_changes(DatasetKind::Reservations)
        .unwrap());
}

#[tokio::test]
async fn save_adopts_server_assigned_ids() {
    let fixture = fixture(MemoryRemoteStore::new());
    let outcome = fixture
        .engine
        .save(
            DatasetKind::CleaningTasks,
            collection(vec![Entity::new().with_field("task", "Change linen")]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.remote, RemoteWrite::Written { entities: 1 });
    assert!(outcome.warning.is_none());
    let stored = local_payload(&fixture, DatasetKind::CleaningTasks).unwrap();
    assert!(stored.entities()[0].id().is_some());
    assert_eq!(stored.entities().to_vec(), fixture.remote.entities(DatasetKind::CleaningTasks));
    assert!(!fixture
        .engine
        .has_pending_changes(DatasetKind::CleaningTasks)
        .unwrap());
}

#[tokio::test]
async fn repeated_price_saves_update_one_remote_row() {
    let fixture = fixture(MemoryRemoteStore::new());
    for night in [90, 120] {
        fixture
            .engine
            .save(DatasetKind::Prices, Payload::Single(Entity::new().with_field("night", night)))
            .await
            .unwrap();
    }

    let rows = fixture.remote.entities(DatasetKind::Prices);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("night"), Some(&serde_json::json!(120)));
    assert_eq!(fixture.remote.calls("create"), 1);

    let loaded = fixture.engine.load(DatasetKind::Prices).await.unwrap().unwrap();
    assert_eq!(loaded.payload, Payload::Single(rows[0].clone()));
    assert_eq!(local_payload(&fixture, DatasetKind::Prices), Some(loaded.payload));
}

#[tokio::test]
async fn first_price_save_updates_existing_remote_row() {
    let fixture = fixture(MemoryRemoteStore::new().with_entities(
        DatasetKind::Prices,
        vec![entity("p1", 1).with_field("night", 80)],
    ));
    fixture
        .engine
        .save(DatasetKind::Prices, Payload::Single(Entity::new().with_field("night", 95)))
        .await
        .unwrap();

    let rows = fixture.remote.entities(DatasetKind::Prices);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id().as_deref(), Some("p1"));
    assert_eq!(rows[0].get("night"), Some(&serde_json::json!(95)));
    let stored = local_payload(&fixture, DatasetKind::Prices).unwrap();
    assert_eq!(stored.entities()[0].id().as_deref(), Some("p1"));
}

#[tokio::test]
async fn back_to_back_saves_get_increasing_stamps() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture.remote.set_online(false);

    let mut stamps = Vec::new();
    for guest in ["Ana", "Ben", "Cleo"] {
        fixture
            .engine
            .save(
                DatasetKind::Reservations,
                collection(vec![entity("r1", 1).with_field("guest", guest)]),
            )
            .await
            .unwrap();
        let envelope = fixture
            .engine
            .local_snapshot(DatasetKind::Reservations)
            .unwrap()
            .unwrap();
        stamps.push(envelope.last_updated);
    }

    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]), "{stamps:?}");
}

#[tokio::test]
async fn save_pushes_only_changed_entities() {
    let fixture = fixture(MemoryRemoteStore::new());
    let first = entity("a1", 1);
    fixture
        .engine
        .save(DatasetKind::Apartments, collection(vec![first.clone(), entity("a2", 1)]))
        .await
        .unwrap();
    fixture
        .engine
        .save(
            DatasetKind::Apartments,
            collection(vec![first, entity("a2", 2).with_field("beds", 3)]),
        )
        .await
        .unwrap();

    assert_eq!(fixture.remote.calls("update"), 3);
    assert_eq!(fixture.remote.calls("create"), 2);
    assert_eq!(
        fixture.remote.entities(DatasetKind::Apartments)[1].get("beds"),
        Some(&serde_json::json!(3))
    );
}

#[tokio::test]
async fn save_rejects_wrong_shape() {
    let fixture = fixture(MemoryRemoteStore::new());
    let result = fixture
        .engine
        .save(DatasetKind::Prices, collection(vec![entity("p", 1)]))
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn save_fails_only_when_both_backends_fail() {
    let fixture = flaky_fixture(MemoryRemoteStore::new(), &[DatasetKind::Reservations], vec![]);

    let remote_only = fixture
        .engine
        .save(DatasetKind::Reservations, collection(vec![entity("r1", 1)]))
        .await
        .unwrap();
    assert!(remote_only.is_accepted());
    assert!(!remote_only.local_written);
    assert_eq!(remote_only.warning.as_deref(), Some(REMOTE_ONLY_WARNING));

    fixture.remote.set_online(false);
    let result = fixture
        .engine
        .save(DatasetKind::Reservations, collection(vec![entity("r2", 1)]))
        .await;
    assert!(matches!(
        result,
        Err(Error::BothBackendsFailed {
            dataset: DatasetKind::Reservations,
            ..
        })
    ));
}

#[tokio::test]
async fn concurrent_synchronize_runs_one_merge() {
    let fixture = fixture(
        MemoryRemoteStore::new().with_entities(DatasetKind::Reservations, vec![entity("r1", 1)]),
    );
    fixture.remote.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(
        fixture.engine.synchronize(DatasetKind::Reservations),
        fixture.engine.synchronize(DatasetKind::Reservations),
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| matches!(outcome, SyncOutcome::Skipped))
            .count(),
        1
    );
    assert_eq!(fixture.remote.calls("list"), 1);

    // The guard is released once the merge finishes
    let again = fixture
        .engine
        .synchronize(DatasetKind::Reservations)
        .await
        .unwrap();
    assert!(matches!(again, SyncOutcome::Merged(_)));
}

#[tokio::test]
async fn synchronize_is_idempotent() {
    let fixture = fixture(MemoryRemoteStore::new().with_entities(
        DatasetKind::Reservations,
        vec![entity("r1", 200), entity("r2", 50)],
    ));
    seed_local(
        &fixture,
        DatasetKind::Reservations,
        collection(vec![entity("r1", 100), entity("r3", 7)]),
    );

    fixture.engine.synchronize(DatasetKind::Reservations).await.unwrap();
    let first = local_payload(&fixture, DatasetKind::Reservations);
    let second_outcome = fixture.engine.synchronize(DatasetKind::Reservations).await.unwrap();
    let second = local_payload(&fixture, DatasetKind::Reservations);

    assert_eq!(first, second);
    assert!(matches!(second_outcome, SyncOutcome::Merged(ref report) if report.pushed == 0));
    assert_eq!(fixture.remote.entities(DatasetKind::Reservations).len(), 3);
}

#[tokio::test]
async fn synchronize_while_offline_keeps_local_and_notifies() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture.remote.set_online(false);
    let local = collection(vec![entity("r1", 1)]);
    seed_local(&fixture, DatasetKind::Reservations, local.clone());
    let synchronized = counter(&fixture.engine, DatasetKind::Reservations, ChangeReason::Synchronized);

    let outcome = fixture
        .engine
        .synchronize(DatasetKind::Reservations)
        .await
        .unwrap();

    let SyncOutcome::Merged(report) = outcome else {
        panic!("expected a merge");
    };
    assert!(report.local_persisted);
    assert!(!report.remote_persisted);
    assert_eq!(local_payload(&fixture, DatasetKind::Reservations), Some(local));
    assert_eq!(synchronized.load(Ordering::SeqCst), 1);
    assert!(fixture
        .engine
        .last_synced_at(DatasetKind::Reservations)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn synchronize_fails_when_neither_side_persists() {
    let fixture = flaky_fixture(
        MemoryRemoteStore::new(),
        &[DatasetKind::Apartments],
        vec![(DatasetKind::Apartments, collection(vec![entity("a1", 1)]))],
    );
    fixture.remote.set_online(false);

    let result = fixture.engine.synchronize(DatasetKind::Apartments).await;
    assert!(matches!(result, Err(Error::BothBackendsFailed { .. })));
}

#[tokio::test]
async fn synchronize_all_reports_failures_without_stopping() {
    let fixture = flaky_fixture(
        MemoryRemoteStore::new(),
        &[DatasetKind::Prices],
        vec![
            (DatasetKind::Prices, Payload::Single(entity("p", 1))),
            (DatasetKind::Reservations, collection(vec![entity("r1", 1)])),
        ],
    );
    fixture.remote.set_online(false);

    let summary = fixture.engine.synchronize_all().await;

    assert_eq!(summary.failed, vec![DatasetKind::Prices]);
    assert_eq!(
        summary.succeeded,
        vec![
            DatasetKind::Reservations,
            DatasetKind::CleaningTasks,
            DatasetKind::Apartments
        ]
    );
    assert!(summary.skipped.is_empty());
    assert!(!summary.is_complete());
}

#[tokio::test]
async fn subscribers_hear_saves_and_syncs_but_not_loads() {
    let fixture = fixture(MemoryRemoteStore::new());
    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let subscription = fixture.engine.subscribe(DatasetKind::Apartments, {
        let events = events.clone();
        move |event| events.lock().unwrap().push(event.reason)
    });

    fixture
        .engine
        .save(DatasetKind::Apartments, collection(vec![entity("a1", 1)]))
        .await
        .unwrap();
    fixture.engine.load(DatasetKind::Apartments).await.unwrap();
    fixture
        .engine
        .synchronize(DatasetKind::Apartments)
        .await
        .unwrap();
    fixture
        .engine
        .remove(DatasetKind::Apartments, "a1")
        .await
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ChangeReason::Saved,
            ChangeReason::Synchronized,
            ChangeReason::Removed
        ]
    );

    subscription.unsubscribe();
    fixture
        .engine
        .save(DatasetKind::Apartments, collection(vec![]))
        .await
        .unwrap();
    assert_eq!(events.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn remove_deletes_on_both_sides() {
    let fixture = fixture(MemoryRemoteStore::new());
    fixture
        .engine
        .save(
            DatasetKind::Reservations,
            collection(vec![entity("r1", 1), entity("r2", 1)]),
        )
        .await
        .unwrap();

    let outcome = fixture
        .engine
        .remove(DatasetKind::Reservations, "r1")
        .await
        .unwrap();

    assert!(outcome.remote.is_written());
    assert_eq!(
        local_payload(&fixture, DatasetKind::Reservations),
        Some(collection(vec![entity("r2", 1)]))
    );
    assert_eq!(
        fixture.remote.entities(DatasetKind::Reservations),
        vec![entity("r2", 1)]
    );
    assert!(fixture.engine.remove(DatasetKind::Prices, "p").await.is_err());
}

#[tokio::test]
async fn test_connection_reflects_remote_state() {
    let fixture = fixture(MemoryRemoteStore::new());
    assert!(fixture.engine.test_connection().await);
    assert!(fixture.engine.connection_state().available);

    fixture.remote.set_online(false);
    assert!(!fixture.engine.test_connection().await);
    assert_eq!(fixture.engine.connection_state().consecutive_failures, 1);
}

#[tokio::test]
async fn force_full_resync_calls_remote_then_synchronizes() {
    let fixture = fixture(
        MemoryRemoteStore::new().with_entities(DatasetKind::Apartments, vec![entity("a1", 1)]),
    );

    let summary = fixture.engine.force_full_resync().await.unwrap();

    assert_eq!(fixture.remote.calls("force_full_resync"), 1);
    assert_eq!(summary.succeeded.len(), 4);
    assert_eq!(
        local_payload(&fixture, DatasetKind::Apartments),
        Some(collection(vec![entity("a1", 1)]))
    );

    fixture.remote.set_online(false);
    assert!(fixture.engine.force_full_resync().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn passive_resync_runs_on_tick_and_activation_until_shutdown() {
    let fixture = fixture(MemoryRemoteStore::new());
    let runs = counter(&fixture.engine, DatasetKind::Reservations, ChangeReason::Synchronized);
    let settle = || tokio::time::sleep(Duration::from_millis(10));

    let handle = scheduler::spawn(fixture.engine.clone(), Duration::from_secs(30));
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    handle.became_active();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(handle.is_running());

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

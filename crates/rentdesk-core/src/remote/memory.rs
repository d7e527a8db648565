//! In-process remote store for tests, demos and offline development.
//!
//! Behaves like a well-formed PostgREST backend by default. Tests can take it
//! offline, slow it down, script failures for upcoming calls or replace a
//! dataset's list response with arbitrary (malformed) JSON.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{DatasetKind, Entity, Visit};

use super::{RemoteError, RemoteResult, RemoteStore};

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<DatasetKind, Vec<Entity>>,
    raw_lists: BTreeMap<DatasetKind, Value>,
    failures: VecDeque<RemoteError>,
    visits: Vec<Visit>,
    calls: BTreeMap<&'static str, usize>,
    latency: Duration,
}

pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    online: AtomicBool,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// Empty, reachable store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Seed a dataset
    #[must_use]
    pub fn with_entities(self, kind: DatasetKind, entities: Vec<Entity>) -> Self {
        self.seed(kind, entities);
        self
    }

    /// Replace a dataset's rows
    pub fn seed(&self, kind: DatasetKind, entities: Vec<Entity>) {
        self.lock().tables.insert(kind, entities);
    }

    /// Toggle reachability; offline calls fail with `Unavailable`
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delay applied to every call before it is answered
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Fail the next call (of any kind) with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().failures.push_back(error);
    }

    /// Answer `list(kind)` with `body` verbatim until cleared
    pub fn set_raw_list(&self, kind: DatasetKind, body: Value) {
        self.lock().raw_lists.insert(kind, body);
    }

    pub fn clear_raw_list(&self, kind: DatasetKind) {
        self.lock().raw_lists.remove(&kind);
    }

    /// Current rows of a dataset
    pub fn entities(&self, kind: DatasetKind) -> Vec<Entity> {
        self.lock().tables.get(&kind).cloned().unwrap_or_default()
    }

    /// Recorded visits
    pub fn visits(&self) -> Vec<Visit> {
        self.lock().visits.clone()
    }

    /// How many times `operation` was called (including failed calls)
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, operation: &'static str) -> RemoteResult<()> {
        let latency = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_insert(0) += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("connection refused".to_string()));
        }
        self.lock().failures.pop_front().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn ping(&self) -> RemoteResult<()> {
        self.enter("ping").await
    }

    async fn list(&self, kind: DatasetKind) -> RemoteResult<Value> {
        self.enter("list").await?;
        let state = self.lock();
        if let Some(raw) = state.raw_lists.get(&kind) {
            return Ok(raw.clone());
        }

        let rows = state.tables.get(&kind).map(Vec::as_slice).unwrap_or_default();
        if kind.is_collection() {
            Ok(Value::Array(
                rows.iter().cloned().map(Entity::into_value).collect(),
            ))
        } else {
            Ok(rows
                .first()
                .cloned()
                .map_or(Value::Null, Entity::into_value))
        }
    }

    async fn create(&self, kind: DatasetKind, entity: &Entity) -> RemoteResult<Entity> {
        self.enter("create").await?;
        let mut state = self.lock();
        let rows = state.tables.entry(kind).or_default();

        let stored = match entity.id() {
            Some(id) if rows.iter().any(|row| row.id().as_deref() == Some(id.as_str())) => {
                return Err(RemoteError::Api {
                    status: 409,
                    message: format!("duplicate key value violates unique constraint ({id})"),
                });
            }
            Some(_) => entity.clone(),
            None => entity.clone().with_id(Uuid::now_v7().to_string()),
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: DatasetKind, id: &str, patch: &Entity) -> RemoteResult<Entity> {
        self.enter("update").await?;
        let mut state = self.lock();
        let row = state
            .tables
            .entry(kind)
            .or_default()
            .iter_mut()
            .find(|row| row.id().as_deref() == Some(id))
            .ok_or_else(|| RemoteError::NotFound(format!("{kind}/{id}")))?;

        let mut fields = row.as_map().clone();
        for (key, value) in patch.as_map() {
            fields.insert(key.clone(), value.clone());
        }
        *row = Entity::from(fields);
        Ok(row.clone())
    }

    async fn delete(&self, kind: DatasetKind, id: &str) -> RemoteResult<()> {
        self.enter("delete").await?;
        if let Some(rows) = self.lock().tables.get_mut(&kind) {
            rows.retain(|row| row.id().as_deref() != Some(id));
        }
        Ok(())
    }

    async fn force_full_resync(&self) -> RemoteResult<()> {
        self.enter("force_full_resync").await
    }

    async fn record_visit(&self, visit: &Visit) -> RemoteResult<()> {
        self.enter("record_visit").await?;
        self.lock().visits.push(visit.clone());
        Ok(())
    }

    async fn count_visits(&self, since: DateTime<Utc>) -> RemoteResult<u64> {
        self.enter("count_visits").await?;
        let count = self
            .lock()
            .visits
            .iter()
            .filter(|visit| visit.visited_at >= since)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

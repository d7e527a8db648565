//! Typed, retried access to the remote store.
//!
//! Every call goes through the retry executor. `list` also validates the
//! response shape; a wrong shape is reported as `Malformed`, which retries and
//! falls back exactly like a network failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{DatasetKind, Entity, Payload, Visit};
use crate::resilience::{best_effort, with_retry, HealthProbe, RetryPolicy};

use super::{RemoteError, RemoteResult, RemoteStore};

pub struct RemoteGateway {
    store: Arc<dyn RemoteStore>,
    interactive: RetryPolicy,
    best_effort: RetryPolicy,
}

impl RemoteGateway {
    /// Gateway with the default interactive and best-effort policies
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self::with_policies(store, RetryPolicy::interactive(), RetryPolicy::best_effort())
    }

    pub fn with_policies(
        store: Arc<dyn RemoteStore>,
        interactive: RetryPolicy,
        best_effort: RetryPolicy,
    ) -> Self {
        Self {
            store,
            interactive,
            best_effort,
        }
    }

    /// Fetch and validate a dataset.
    ///
    /// Returns `None` only for a singleton dataset with no remote row yet.
    pub async fn list(&self, kind: DatasetKind) -> RemoteResult<Option<Payload>> {
        let operation = format!("{kind}.list");
        with_retry(&operation, &self.interactive, || async move {
            let body = self.store.list(kind).await?;
            validate_list(kind, body)
        })
        .await
    }

    pub async fn create(&self, kind: DatasetKind, entity: &Entity) -> RemoteResult<Entity> {
        let operation = format!("{kind}.create");
        with_retry(&operation, &self.interactive, || self.store.create(kind, entity)).await
    }

    pub async fn update(&self, kind: DatasetKind, id: &str, patch: &Entity) -> RemoteResult<Entity> {
        let operation = format!("{kind}.update");
        with_retry(&operation, &self.interactive, || {
            self.store.update(kind, id, patch)
        })
        .await
    }

    pub async fn delete(&self, kind: DatasetKind, id: &str) -> RemoteResult<()> {
        let operation = format!("{kind}.delete");
        with_retry(&operation, &self.interactive, || self.store.delete(kind, id)).await
    }

    /// Create-or-update, decided by the presence of an `id`.
    ///
    /// An update that finds no row falls back to create, so a record first
    /// saved offline reaches the remote with its local id.
    pub async fn upsert(&self, kind: DatasetKind, entity: &Entity) -> RemoteResult<Entity> {
        let Some(id) = entity.id() else {
            return self.create(kind, entity).await;
        };
        match self.update(kind, &id, entity).await {
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!(dataset = %kind, id = %id, "Remote row missing; creating");
                self.create(kind, entity).await
            }
            other => other,
        }
    }

    pub async fn force_full_resync(&self) -> RemoteResult<()> {
        with_retry("force_full_resync", &self.interactive, || {
            self.store.force_full_resync()
        })
        .await
    }

    /// Fire-and-forget visit write. Never fails the caller.
    pub async fn record_visit(&self, visit: &Visit) -> bool {
        best_effort("record_visit", &self.best_effort, || {
            self.store.record_visit(visit)
        })
        .await
        .is_some()
    }

    pub async fn count_visits(&self, since: DateTime<Utc>) -> RemoteResult<u64> {
        with_retry("count_visits", &self.interactive, || {
            self.store.count_visits(since)
        })
        .await
    }
}

#[async_trait]
impl HealthProbe for RemoteGateway {
    async fn probe(&self) -> Result<(), String> {
        self.store.ping().await.map_err(|error| error.to_string())
    }
}

fn validate_list(kind: DatasetKind, body: Value) -> RemoteResult<Option<Payload>> {
    if body.is_null() && !kind.is_collection() {
        return Ok(None);
    }
    Payload::from_json(kind, body)
        .map(Some)
        .map_err(|error| RemoteError::Malformed(error.to_string()))
}

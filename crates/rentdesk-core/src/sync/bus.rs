//! Per-dataset change notification registry

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use crate::models::DatasetKind;

/// Why subscribers are being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Saved,
    Synchronized,
    Removed,
}

/// Delivered to subscribers after a state-changing operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub dataset: DatasetKind,
    pub reason: ChangeReason,
    /// `last_updated` of the envelope now stored locally, if any
    pub last_updated: Option<i64>,
}

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type Registry = BTreeMap<DatasetKind, Vec<(u64, Callback)>>;

/// Subscriber registry keyed by dataset kind
#[derive(Default)]
pub struct ChangeBus {
    subscribers: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes to `kind`.
    ///
    /// The subscription stays active until [`Subscription::unsubscribe`] is
    /// called; dropping the handle does not unsubscribe.
    pub fn subscribe<F>(&self, kind: DatasetKind, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Invoke every subscriber of `event.dataset` in registration order.
    ///
    /// A panicking callback is logged and skipped; the rest still run.
    pub fn notify(&self, event: &ChangeEvent) {
        let callbacks: Vec<(u64, Callback)> = lock(&self.subscribers)
            .get(&event.dataset)
            .cloned()
            .unwrap_or_default();

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(
                    dataset = %event.dataset,
                    subscriber = id,
                    "Change subscriber panicked"
                );
            }
        }
    }

    /// Number of live subscribers for `kind`
    pub fn subscriber_count(&self, kind: DatasetKind) -> usize {
        lock(&self.subscribers).get(&kind).map_or(0, Vec::len)
    }
}

/// Handle returned by [`ChangeBus::subscribe`]
#[must_use = "keep the subscription to be able to unsubscribe"]
#[derive(Debug)]
pub struct Subscription {
    kind: DatasetKind,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub const fn dataset(&self) -> DatasetKind {
        self.kind
    }

    /// Remove the callback. Safe to call after the bus is gone.
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(callbacks) = registry.get_mut(&self.kind) {
            callbacks.retain(|(id, _)| *id != self.id);
            if callbacks.is_empty() {
                registry.remove(&self.kind);
            }
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // Callbacks run outside the lock, so poisoning cannot leave the map half-updated
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Record envelope model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DatasetKind, DeviceIdentity, Payload};

/// Metadata-wrapped snapshot of one dataset.
///
/// `last_updated` is stamped by the writer when the envelope is created and is
/// never rewritten by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Opaque identifier of this snapshot
    pub record_set_id: String,
    /// Dataset this snapshot belongs to
    #[serde(rename = "datasetKind")]
    pub dataset: DatasetKind,
    /// Write time (Unix ms)
    pub last_updated: i64,
    /// Installation that wrote the snapshot
    pub origin_device_id: String,
    /// Process that wrote the snapshot (diagnostics only)
    pub origin_session_id: String,
    /// Wrapped data
    pub payload: Payload,
}

impl Envelope {
    /// Wrap a payload, stamping it with the current time and the writer's identity
    #[must_use]
    pub fn new(dataset: DatasetKind, payload: Payload, identity: &DeviceIdentity) -> Self {
        Self {
            record_set_id: Uuid::now_v7().to_string(),
            dataset,
            last_updated: chrono::Utc::now().timestamp_millis(),
            origin_device_id: identity.device_id.clone(),
            origin_session_id: identity.session_id.clone(),
            payload,
        }
    }

    /// Keep `last_updated` strictly after the stamp of the snapshot being replaced.
    ///
    /// Two writes within the same millisecond (or after a clock step back)
    /// still get increasing stamps.
    #[must_use]
    pub fn following(mut self, previous: Option<i64>) -> Self {
        if let Some(previous) = previous {
            self.last_updated = self.last_updated.max(previous.saturating_add(1));
        }
        self
    }
}

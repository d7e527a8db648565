//! Remote relational store access.
//!
//! [`RemoteStore`] is the raw transport: one network call per method, no
//! retries. [`RemoteGateway`] layers the retry executor and response shape
//! validation on top and is what the engine talks to.

mod gateway;
mod memory;
mod rest;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::models::{DatasetKind, Entity, Visit};
use crate::resilience::{AttemptTimeout, RetryableError};

pub use gateway::RemoteGateway;
pub use memory::MemoryRemoteStore;
pub use rest::RestRemoteStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Remote call '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("Malformed remote response: {0}")]
    Malformed(String),
    #[error("Remote record not found: {0}")]
    NotFound(String),
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Remote store is not configured")]
    NotConfigured,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Retry behavior for an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Classify HTTP status into retry behavior.
pub const fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 | 500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

impl RemoteError {
    /// Whether a later attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(error) => !error.is_builder(),
            Self::Api { status, .. } => {
                matches!(classify_http_status(*status), RetryClass::Retryable)
            }
            Self::Timeout { .. } | Self::Malformed(_) | Self::Unavailable(_) => true,
            Self::NotFound(_) | Self::NotConfigured => false,
        }
    }
}

impl From<AttemptTimeout> for RemoteError {
    fn from(timeout: AttemptTimeout) -> Self {
        Self::Timeout {
            operation: timeout.operation,
            after: timeout.after,
        }
    }
}

impl RetryableError for RemoteError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

/// Raw remote transport. Implementations make exactly one call per method.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability check
    async fn ping(&self) -> RemoteResult<()>;

    /// Fetch a dataset as raw JSON: an array for collections, an object (or
    /// `null` when no row exists) for singletons. Shape is validated upstream.
    async fn list(&self, kind: DatasetKind) -> RemoteResult<Value>;

    /// Insert an entity, returning the stored row (with server-assigned fields)
    async fn create(&self, kind: DatasetKind, entity: &Entity) -> RemoteResult<Entity>;

    /// Patch the entity with `id`, returning the stored row
    async fn update(&self, kind: DatasetKind, id: &str, patch: &Entity) -> RemoteResult<Entity>;

    async fn delete(&self, kind: DatasetKind, id: &str) -> RemoteResult<()>;

    /// Ask the server to rebuild its derived state from scratch
    async fn force_full_resync(&self) -> RemoteResult<()>;

    async fn record_visit(&self, visit: &Visit) -> RemoteResult<()>;

    /// Number of visits recorded at or after `since`
    async fn count_visits(&self, since: DateTime<Utc>) -> RemoteResult<u64>;
}

/// Stand-in used when no remote is configured: the engine stays local-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedStore;

#[async_trait]
impl RemoteStore for DisconnectedStore {
    async fn ping(&self) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn list(&self, _kind: DatasetKind) -> RemoteResult<Value> {
        Err(RemoteError::NotConfigured)
    }

    async fn create(&self, _kind: DatasetKind, _entity: &Entity) -> RemoteResult<Entity> {
        Err(RemoteError::NotConfigured)
    }

    async fn update(&self, _kind: DatasetKind, _id: &str, _patch: &Entity) -> RemoteResult<Entity> {
        Err(RemoteError::NotConfigured)
    }

    async fn delete(&self, _kind: DatasetKind, _id: &str) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn force_full_resync(&self) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn record_visit(&self, _visit: &Visit) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn count_visits(&self, _since: DateTime<Utc>) -> RemoteResult<u64> {
        Err(RemoteError::NotConfigured)
    }
}

//! Local persistence adapter: one durable snapshot per dataset kind

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{DatasetKind, DeviceIdentity, Envelope};

use super::Database;

const DEVICE_ID_KEY: &str = "device_id";

/// Durable key-value storage scoped by dataset kind.
///
/// Calls are synchronous. A missing snapshot is `Ok(None)`, never an error;
/// errors are reserved for serialization and storage-medium failures.
pub trait LocalStore: Send + Sync {
    /// Read the latest envelope for a dataset
    fn read(&self, kind: DatasetKind) -> Result<Option<Envelope>>;

    /// Replace the envelope for a dataset
    fn write(&self, kind: DatasetKind, envelope: &Envelope) -> Result<()>;

    /// When the dataset last completed a full synchronize (Unix ms)
    fn last_synced_at(&self, kind: DatasetKind) -> Result<Option<i64>>;

    /// Record a completed synchronize
    fn mark_synced(&self, kind: DatasetKind, at: i64) -> Result<()>;

    /// Whether the snapshot holds writes the remote has not accepted yet
    fn has_pending_changes(&self, kind: DatasetKind) -> Result<bool>;

    /// Flag or clear unpushed local writes
    fn set_pending_changes(&self, kind: DatasetKind, pending: bool) -> Result<()>;
}

/// `SQLite` implementation of `LocalStore`
pub struct SqliteSnapshotStore {
    db: Mutex<Database>,
}

impl SqliteSnapshotStore {
    /// Wrap an open database
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open (or create) the store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Load this installation's identity, creating the device id on first use
    pub fn device_identity(&self) -> Result<DeviceIdentity> {
        let db = self.lock()?;
        let conn = db.connection();
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                params![DEVICE_ID_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let device_id = if let Some(device_id) = existing {
            device_id
        } else {
            let device_id = DeviceIdentity::generate_device_id();
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?, ?)",
                params![DEVICE_ID_KEY, device_id],
            )?;
            tracing::info!(device_id = %device_id, "Registered new device identity");
            device_id
        };

        Ok(DeviceIdentity::new(device_id))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Database("local store lock poisoned".to_string()))
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.lock()?;
        f(db.connection())
    }
}

impl LocalStore for SqliteSnapshotStore {
    fn read(&self, kind: DatasetKind) -> Result<Option<Envelope>> {
        let raw: Option<String> = self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT envelope FROM snapshots WHERE dataset = ?",
                    params![kind.storage_key()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        raw.map(|raw| serde_json::from_str::<Envelope>(&raw).map_err(Error::from))
            .transpose()
    }

    fn write(&self, kind: DatasetKind, envelope: &Envelope) -> Result<()> {
        if envelope.dataset != kind {
            return Err(Error::InvalidInput(format!(
                "envelope for {} cannot be stored under {kind}",
                envelope.dataset
            )));
        }
        let serialized = serde_json::to_string(envelope)?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO snapshots (dataset, envelope, last_updated) VALUES (?, ?, ?)
                 ON CONFLICT(dataset) DO UPDATE SET
                    envelope = excluded.envelope,
                    last_updated = excluded.last_updated",
                params![kind.storage_key(), serialized, envelope.last_updated],
            )?;
            Ok(())
        })
    }

    fn last_synced_at(&self, kind: DatasetKind) -> Result<Option<i64>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT last_synced_at FROM sync_state WHERE dataset = ?",
                    params![kind.storage_key()],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten())
        })
    }

    fn mark_synced(&self, kind: DatasetKind, at: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sync_state (dataset, last_synced_at) VALUES (?, ?)
                 ON CONFLICT(dataset) DO UPDATE SET last_synced_at = excluded.last_synced_at",
                params![kind.storage_key(), at],
            )?;
            Ok(())
        })
    }

    fn has_pending_changes(&self, kind: DatasetKind) -> Result<bool> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT pending_local FROM sync_state WHERE dataset = ?",
                    params![kind.storage_key()],
                    |row| row.get::<_, bool>(0),
                )
                .optional()?
                .unwrap_or(false))
        })
    }

    fn set_pending_changes(&self, kind: DatasetKind, pending: bool) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sync_state (dataset, pending_local) VALUES (?, ?)
                 ON CONFLICT(dataset) DO UPDATE SET pending_local = excluded.pending_local",
                params![kind.storage_key(), pending],
            )?;
            Ok(())
        })
    }
}

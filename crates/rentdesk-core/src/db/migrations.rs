//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: dataset snapshots and device metadata
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        -- One durable entry per dataset kind holding the latest envelope
        CREATE TABLE IF NOT EXISTS snapshots (
            dataset TEXT PRIMARY KEY,
            envelope TEXT NOT NULL,
            last_updated INTEGER NOT NULL
        );
        -- Device identity and other local-only values
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;
    Ok(())
}

/// Migration to version 2: per-dataset sync bookkeeping
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        -- pending_local is set while the snapshot holds writes the remote has not seen
        CREATE TABLE IF NOT EXISTS sync_state (
            dataset TEXT PRIMARY KEY,
            last_synced_at INTEGER,
            pending_local INTEGER NOT NULL DEFAULT 0
        );
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;
    Ok(())
}

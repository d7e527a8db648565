//! Local persistence layer for Rentdesk

mod connection;
mod migrations;
mod snapshot_repository;

pub use connection::Database;
pub use snapshot_repository::{LocalStore, SqliteSnapshotStore};

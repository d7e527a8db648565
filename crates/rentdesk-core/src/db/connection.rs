//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Database wrapper for the local `SQLite` file
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    fn configure(&self) -> Result<()> {
        // In-memory databases reject WAL; that's fine
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

//! SQLite ledgers for holder, snapshot and badge state
//!
//! ## Tables
//!
//! - `artists` - Artist metadata (genre), placeholder rows created on first sight
//! - `holders` - One row per (artist, user) first purchase, with the early flag
//! - `snapshots` - Append-only per-artist price / holder-count series
//! - `badges` - Awards, unique per (user, badge kind, scope)
//!
//! All access goes through a single connection guarded by a mutex; the
//! database runs in WAL mode so external readers are not blocked.

pub mod schema;
pub mod artists;
pub mod holders;
pub mod snapshots;
pub mod badges;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::EngineError;

/// SQLite database backing the three ledgers
pub struct EngineDb {
    conn: Mutex<Connection>,
}

impl EngineDb {
    /// Open or create the ledger database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        info!("Opening ledger database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory ledger database");

        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), EngineError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read (or single-statement write) against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<T, EngineError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, EngineError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, EngineError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                artist_count: count("SELECT COUNT(*) FROM artists")?,
                holder_count: count("SELECT COUNT(*) FROM holders")?,
                snapshot_count: count("SELECT COUNT(*) FROM snapshots")?,
                badge_count: count("SELECT COUNT(*) FROM badges")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub artist_count: u64,
    pub holder_count: u64,
    pub snapshot_count: u64,
    pub badge_count: u64,
}

// Re-exports
pub use artists::ArtistRow;
pub use badges::{AwardOutcome, BadgeKind, BadgeRow, Scope};
pub use holders::HolderRow;
pub use snapshots::SnapshotRow;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let db = EngineDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(
            stats,
            DbStats {
                artist_count: 0,
                holder_count: 0,
                snapshot_count: 0,
                badge_count: 0,
            }
        );
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let db = EngineDb::open(&path).unwrap();
            db.with_conn(|conn| artists::register_artist(conn, 1, Some("jazz")))
                .unwrap();
        }

        let db = EngineDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap().artist_count, 1);
    }
}

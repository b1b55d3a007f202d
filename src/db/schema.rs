//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(LEDGER_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), EngineError> {
    info!("No migration steps registered from v{}", from_version);
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Ledger tables.
///
/// u128 amounts and prices are stored as decimal TEXT; SQLite integers are
/// only 64 bits wide.
const LEDGER_SCHEMA: &str = r#"
-- Artist metadata, owned by the registry; placeholders have no genre
CREATE TABLE IF NOT EXISTS artists (
    artist_id INTEGER PRIMARY KEY NOT NULL,
    genre TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per distinct (artist, user), written on first purchase only
CREATE TABLE IF NOT EXISTS holders (
    artist_id INTEGER NOT NULL,
    user_address TEXT NOT NULL,
    first_purchase_block INTEGER NOT NULL,
    first_purchase_timestamp INTEGER NOT NULL,
    early_holder INTEGER NOT NULL,
    PRIMARY KEY (artist_id, user_address),
    FOREIGN KEY (artist_id) REFERENCES artists(artist_id)
);

-- Append-only stats series, one row per processed event
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    artist_id INTEGER NOT NULL,
    block_height INTEGER NOT NULL,
    price TEXT NOT NULL,
    holder_count INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    event_key TEXT
);

-- Badge awards; the primary key is the uniqueness contract
CREATE TABLE IF NOT EXISTS badges (
    user_address TEXT NOT NULL,
    badge_kind TEXT NOT NULL,
    scope TEXT NOT NULL,
    artist_id INTEGER,
    awarded_at INTEGER NOT NULL,
    block_height INTEGER NOT NULL,
    metadata_json TEXT NOT NULL,
    PRIMARY KEY (user_address, badge_kind, scope)
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_holders_user ON holders(user_address);
CREATE INDEX IF NOT EXISTS idx_holders_early ON holders(artist_id, early_holder);

CREATE INDEX IF NOT EXISTS idx_snapshots_artist_time ON snapshots(artist_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_snapshots_event_key ON snapshots(artist_id, event_key);

CREATE INDEX IF NOT EXISTS idx_badges_artist ON badges(artist_id);
CREATE INDEX IF NOT EXISTS idx_badges_kind ON badges(badge_kind);
"#;

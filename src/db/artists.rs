//! Artist metadata
//!
//! Metadata is owned by the artist registry; the engine only reads genres and
//! inserts genre-less placeholders for artists it has not seen registered.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;

/// Artist row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistRow {
    pub artist_id: u64,
    pub genre: Option<String>,
}

impl ArtistRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let artist_id: i64 = row.get("artist_id")?;
        Ok(Self {
            artist_id: artist_id as u64,
            genre: row.get("genre")?,
        })
    }
}

/// Insert a placeholder row if the artist is unknown. Never touches an existing genre.
pub fn ensure_artist(conn: &Connection, artist_id: u64) -> Result<bool, EngineError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO artists (artist_id, genre) VALUES (?, NULL)",
        params![artist_id as i64],
    )?;

    if inserted > 0 {
        debug!(artist_id, "Created placeholder artist metadata");
    }
    Ok(inserted > 0)
}

/// Register an artist or update its genre
pub fn register_artist(
    conn: &Connection,
    artist_id: u64,
    genre: Option<&str>,
) -> Result<ArtistRow, EngineError> {
    let genre = genre.map(str::trim).filter(|g| !g.is_empty());

    conn.execute(
        r#"
        INSERT INTO artists (artist_id, genre) VALUES (?, ?)
        ON CONFLICT(artist_id) DO UPDATE SET genre = excluded.genre
        "#,
        params![artist_id as i64, genre],
    )?;

    get_artist(conn, artist_id)?
        .ok_or_else(|| EngineError::Internal("Artist not found after upsert".to_string()))
}

/// Get artist metadata by ID
pub fn get_artist(conn: &Connection, artist_id: u64) -> Result<Option<ArtistRow>, EngineError> {
    let row = conn
        .query_row(
            "SELECT artist_id, genre FROM artists WHERE artist_id = ?",
            params![artist_id as i64],
            |row| ArtistRow::from_row(row),
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_placeholder_keeps_registered_genre() {
        let conn = conn();
        register_artist(&conn, 9, Some("techno")).unwrap();

        assert!(!ensure_artist(&conn, 9).unwrap());
        assert_eq!(
            get_artist(&conn, 9).unwrap().unwrap().genre.as_deref(),
            Some("techno")
        );
    }

    #[test]
    fn test_placeholder_has_no_genre() {
        let conn = conn();
        assert!(ensure_artist(&conn, 4).unwrap());
        assert_eq!(get_artist(&conn, 4).unwrap().unwrap().genre, None);
    }

    #[test]
    fn test_register_fills_placeholder_genre() {
        let conn = conn();
        ensure_artist(&conn, 4).unwrap();
        let row = register_artist(&conn, 4, Some("  folk ")).unwrap();
        assert_eq!(row.genre.as_deref(), Some("folk"));
    }
}

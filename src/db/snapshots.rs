//! Snapshot log
//!
//! Append-only per-artist series of (price, holder count). Appends are
//! unconditional; callers replaying events check `contains_event` first.
//! Each row keeps the fingerprint of the event that produced it, so a replayed
//! event can find its own position in the series.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::EngineError;

/// Snapshot row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub artist_id: u64,
    pub block_height: u64,
    #[serde(with = "crate::event::decimal")]
    pub price: u128,
    pub holder_count: u64,
    pub timestamp: i64,
    /// Fingerprint of the producing event, when recorded
    #[serde(skip)]
    pub event_key: Option<String>,
}

impl SnapshotRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let artist_id: i64 = row.get("artist_id")?;
        let block_height: i64 = row.get("block_height")?;
        let holder_count: i64 = row.get("holder_count")?;
        let price_text: String = row.get("price")?;
        let price = price_text.parse::<u128>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            artist_id: artist_id as u64,
            block_height: block_height as u64,
            price,
            holder_count: holder_count as u64,
            timestamp: row.get("timestamp")?,
            event_key: row.get("event_key")?,
        })
    }
}

/// Input for appending a snapshot
#[derive(Debug, Clone)]
pub struct NewSnapshot<'a> {
    pub artist_id: u64,
    pub block_height: u64,
    pub price: u128,
    pub holder_count: u64,
    pub timestamp: i64,
    /// Fingerprint of the event that produced this snapshot
    pub event_key: Option<&'a str>,
}

/// Append a snapshot, returning its row id
pub fn append_snapshot(conn: &Connection, snapshot: &NewSnapshot<'_>) -> Result<i64, EngineError> {
    conn.execute(
        r#"
        INSERT INTO snapshots (
            artist_id, block_height, price, holder_count, timestamp, event_key
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            snapshot.artist_id as i64,
            snapshot.block_height as i64,
            snapshot.price.to_string(),
            snapshot.holder_count as i64,
            snapshot.timestamp,
            snapshot.event_key,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Whether a snapshot was already appended for this event
pub fn contains_event(conn: &Connection, artist_id: u64, event_key: &str) -> Result<bool, EngineError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM snapshots WHERE artist_id = ? AND event_key = ? LIMIT 1",
            params![artist_id as i64, event_key],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Latest snapshot with `timestamp <= cutoff`
pub fn most_recent_before(
    conn: &Connection,
    artist_id: u64,
    cutoff: i64,
) -> Result<Option<SnapshotRow>, EngineError> {
    let row = conn
        .query_row(
            r#"
            SELECT * FROM snapshots
            WHERE artist_id = ? AND timestamp <= ?
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
            params![artist_id as i64, cutoff],
            |row| SnapshotRow::from_row(row),
        )
        .optional()?;
    Ok(row)
}

/// The two most recently appended snapshots, most recent first
pub fn last_two(
    conn: &Connection,
    artist_id: u64,
) -> Result<(Option<SnapshotRow>, Option<SnapshotRow>), EngineError> {
    let mut latest = history(conn, artist_id, 2)?.into_iter();
    Ok((latest.next(), latest.next()))
}

/// The snapshot appended for an event, looked up by its fingerprint
pub fn for_event(
    conn: &Connection,
    artist_id: u64,
    event_key: &str,
) -> Result<Option<SnapshotRow>, EngineError> {
    let row = conn
        .query_row(
            "SELECT * FROM snapshots WHERE artist_id = ? AND event_key = ? ORDER BY id LIMIT 1",
            params![artist_id as i64, event_key],
            |row| SnapshotRow::from_row(row),
        )
        .optional()?;
    Ok(row)
}

/// The snapshot appended for the same artist immediately before `id`
pub fn preceding(conn: &Connection, artist_id: u64, id: i64) -> Result<Option<SnapshotRow>, EngineError> {
    let row = conn
        .query_row(
            "SELECT * FROM snapshots WHERE artist_id = ? AND id < ? ORDER BY id DESC LIMIT 1",
            params![artist_id as i64, id],
            |row| SnapshotRow::from_row(row),
        )
        .optional()?;
    Ok(row)
}

/// Most recent `limit` snapshots in append order, newest first
pub fn history(conn: &Connection, artist_id: u64, limit: u32) -> Result<Vec<SnapshotRow>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM snapshots WHERE artist_id = ? ORDER BY id DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![artist_id as i64, limit as i64], |row| {
            SnapshotRow::from_row(row)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
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

    fn snap(artist_id: u64, block_height: u64, price: u128, holders: u64, ts: i64) -> NewSnapshot<'static> {
        NewSnapshot {
            artist_id,
            block_height,
            price,
            holder_count: holders,
            timestamp: ts,
            event_key: None,
        }
    }

    #[test]
    fn test_last_two_with_short_history() {
        let conn = conn();
        assert_eq!(last_two(&conn, 1).unwrap(), (None, None));

        append_snapshot(&conn, &snap(1, 1, 10, 1, 100)).unwrap();
        let (latest, previous) = last_two(&conn, 1).unwrap();
        assert_eq!(latest.unwrap().block_height, 1);
        assert!(previous.is_none());
    }

    #[test]
    fn test_last_two_most_recent_first() {
        let conn = conn();
        append_snapshot(&conn, &snap(1, 1, 10, 1, 100)).unwrap();
        append_snapshot(&conn, &snap(1, 2, 20, 2, 200)).unwrap();
        append_snapshot(&conn, &snap(2, 3, 30, 1, 300)).unwrap();
        append_snapshot(&conn, &snap(1, 4, 40, 3, 400)).unwrap();

        let (latest, previous) = last_two(&conn, 1).unwrap();
        assert_eq!(latest.unwrap().price, 40);
        assert_eq!(previous.unwrap().price, 20);
    }

    #[test]
    fn test_for_event_and_preceding() {
        let conn = conn();
        let mut keyed = snap(1, 2, 20, 2, 200);
        keyed.event_key = Some("second");

        let first = append_snapshot(&conn, &snap(1, 1, 10, 1, 100)).unwrap();
        append_snapshot(&conn, &snap(2, 1, 99, 1, 150)).unwrap();
        let second = append_snapshot(&conn, &keyed).unwrap();
        append_snapshot(&conn, &snap(1, 3, 30, 3, 300)).unwrap();

        let found = for_event(&conn, 1, "second").unwrap().unwrap();
        assert_eq!(found.id, second);
        assert_eq!(found.holder_count, 2);
        assert_eq!(found.event_key.as_deref(), Some("second"));
        assert!(for_event(&conn, 2, "second").unwrap().is_none());

        // Later appends and other artists do not matter
        let before = preceding(&conn, 1, found.id).unwrap().unwrap();
        assert_eq!(before.id, first);
        assert_eq!(before.price, 10);
        assert!(preceding(&conn, 1, first).unwrap().is_none());
    }

    #[test]
    fn test_most_recent_before_is_inclusive() {
        let conn = conn();
        append_snapshot(&conn, &snap(1, 1, 10, 1, 100)).unwrap();
        append_snapshot(&conn, &snap(1, 2, 20, 2, 200)).unwrap();

        assert!(most_recent_before(&conn, 1, 99).unwrap().is_none());
        assert_eq!(most_recent_before(&conn, 1, 100).unwrap().unwrap().price, 10);
        assert_eq!(most_recent_before(&conn, 1, 199).unwrap().unwrap().price, 10);
        assert_eq!(most_recent_before(&conn, 1, 5_000).unwrap().unwrap().price, 20);
    }

    #[test]
    fn test_wide_prices_survive_storage() {
        let conn = conn();
        let price = u128::MAX - 7;
        append_snapshot(&conn, &snap(1, 1, price, 1, 100)).unwrap();
        assert_eq!(history(&conn, 1, 10).unwrap()[0].price, price);
    }

    #[test]
    fn test_contains_event() {
        let conn = conn();
        let mut with_key = snap(1, 1, 10, 1, 100);
        with_key.event_key = Some("1:1:100:0xaa:1:1:10");
        append_snapshot(&conn, &with_key).unwrap();

        assert!(contains_event(&conn, 1, "1:1:100:0xaa:1:1:10").unwrap());
        assert!(!contains_event(&conn, 2, "1:1:100:0xaa:1:1:10").unwrap());
        assert!(!contains_event(&conn, 1, "other").unwrap());
    }
}

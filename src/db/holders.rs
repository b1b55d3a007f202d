//! Holder ledger
//!
//! One row per distinct (artist, user), created on the user's first purchase
//! and never revised. The holder count of an artist is always the row count;
//! no separate counter is kept.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use super::artists;
use crate::error::EngineError;

/// Holder row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderRow {
    pub artist_id: u64,
    pub user_address: String,
    pub first_purchase_block: u64,
    pub first_purchase_timestamp: i64,
    pub early_holder: bool,
}

impl HolderRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let artist_id: i64 = row.get("artist_id")?;
        let block: i64 = row.get("first_purchase_block")?;
        Ok(Self {
            artist_id: artist_id as u64,
            user_address: row.get("user_address")?,
            first_purchase_block: block as u64,
            first_purchase_timestamp: row.get("first_purchase_timestamp")?,
            early_holder: row.get("early_holder")?,
        })
    }
}

/// Result of recording a purchase in the holder ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseRecorded {
    /// Distinct holders of the artist after this purchase
    pub holder_count: u64,
    /// Whether this purchase created the user's holder record
    pub new_holder: bool,
    /// Early flag of the user's holder record
    pub early_holder: bool,
}

/// Record a purchase by `user_address` of `artist_id`.
///
/// The first purchase of a pair creates its holder record; the user is early
/// when fewer than `early_limit` holders existed before them. Later purchases
/// leave the record untouched.
pub fn record_purchase(
    conn: &mut Connection,
    artist_id: u64,
    user_address: &str,
    block_height: u64,
    timestamp: i64,
    early_limit: u64,
) -> Result<PurchaseRecorded, EngineError> {
    let tx = conn.transaction()?;

    artists::ensure_artist(&tx, artist_id)?;

    let existing = get_holder(&tx, artist_id, user_address)?;
    let (new_holder, early_holder) = match existing {
        Some(record) => (false, record.early_holder),
        None => {
            let count_before = holder_count(&tx, artist_id)?;
            let early = count_before < early_limit;

            tx.execute(
                r#"
                INSERT INTO holders (
                    artist_id, user_address, first_purchase_block,
                    first_purchase_timestamp, early_holder
                ) VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    artist_id as i64,
                    user_address,
                    block_height as i64,
                    timestamp,
                    early,
                ],
            )?;

            debug!(
                artist_id,
                user = %user_address,
                rank = count_before + 1,
                early,
                "New holder recorded"
            );
            (true, early)
        }
    };

    let holder_count = holder_count(&tx, artist_id)?;
    tx.commit()?;

    Ok(PurchaseRecorded {
        holder_count,
        new_holder,
        early_holder,
    })
}

/// Distinct holder count for an artist
pub fn holder_count(conn: &Connection, artist_id: u64) -> Result<u64, EngineError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM holders WHERE artist_id = ?",
        params![artist_id as i64],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// 1-based position of a holder among the artist's holders, by first purchase.
/// `None` when the user holds nothing of the artist.
pub fn holder_rank(conn: &Connection, artist_id: u64, user_address: &str) -> Result<Option<u64>, EngineError> {
    let rank: i64 = conn.query_row(
        r#"
        SELECT COUNT(*) FROM holders
        WHERE artist_id = ?1
          AND rowid <= (SELECT rowid FROM holders WHERE artist_id = ?1 AND user_address = ?2)
        "#,
        params![artist_id as i64, user_address],
        |row| row.get(0),
    )?;
    Ok(if rank == 0 { None } else { Some(rank as u64) })
}

/// Get a single holder record
pub fn get_holder(
    conn: &Connection,
    artist_id: u64,
    user_address: &str,
) -> Result<Option<HolderRow>, EngineError> {
    let row = conn
        .query_row(
            "SELECT * FROM holders WHERE artist_id = ? AND user_address = ?",
            params![artist_id as i64, user_address],
            |row| HolderRow::from_row(row),
        )
        .optional()?;
    Ok(row)
}

/// All holders of an artist, in first-purchase order
pub fn list_holders(conn: &Connection, artist_id: u64) -> Result<Vec<HolderRow>, EngineError> {
    query_holders(
        conn,
        "SELECT * FROM holders WHERE artist_id = ? ORDER BY rowid",
        artist_id,
    )
}

/// Holders of an artist whose early flag is set, in first-purchase order
pub fn early_holders(conn: &Connection, artist_id: u64) -> Result<Vec<HolderRow>, EngineError> {
    query_holders(
        conn,
        "SELECT * FROM holders WHERE artist_id = ? AND early_holder = 1 ORDER BY rowid",
        artist_id,
    )
}

fn query_holders(conn: &Connection, sql: &str, artist_id: u64) -> Result<Vec<HolderRow>, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![artist_id as i64], |row| HolderRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Distinct non-null genres across every artist the user holds, sorted
pub fn genres_held_by(conn: &Connection, user_address: &str) -> Result<Vec<String>, EngineError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT DISTINCT a.genre
        FROM holders h
        INNER JOIN artists a ON a.artist_id = h.artist_id
        WHERE h.user_address = ? AND a.genre IS NOT NULL
        ORDER BY a.genre
        "#,
    )?;

    let genres = stmt
        .query_map(params![user_address], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(genres)
}

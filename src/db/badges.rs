//! Badge ledger
//!
//! Awards are keyed by (user, badge kind, scope). The key is a PRIMARY KEY
//! and awards are written with `INSERT OR IGNORE`, so the check-and-insert is
//! atomic in storage: concurrent or repeated awards of the same key create
//! exactly one row and every other caller sees `awarded: false`.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

/// The fixed set of badges the engine can award
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    /// Among the first holders of an artist
    FirstBacker,
    /// Early holder of an artist that crossed the holder threshold
    EarlyBeliever,
    /// Bought after a sharp price drop
    DipBuyer,
    /// Holds artists across many genres
    GenreExplorer,
    /// Bought a large share of supply in one purchase
    Whale,
}

impl BadgeKind {
    pub const ALL: [BadgeKind; 5] = [
        BadgeKind::FirstBacker,
        BadgeKind::EarlyBeliever,
        BadgeKind::DipBuyer,
        BadgeKind::GenreExplorer,
        BadgeKind::Whale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstBacker => "first_backer",
            Self::EarlyBeliever => "early_believer",
            Self::DipBuyer => "dip_buyer",
            Self::GenreExplorer => "genre_explorer",
            Self::Whale => "whale",
        }
    }
}

impl fmt::Display for BadgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BadgeKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BadgeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngineError::Internal(format!("Unknown badge kind: {}", s)))
    }
}

/// Dimension a badge is awarded within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "artistId", rename_all = "lowercase")]
pub enum Scope {
    Artist(u64),
    Global,
}

impl Scope {
    /// Storage key for the scope column
    pub fn key(&self) -> String {
        match self {
            Self::Artist(id) => format!("artist:{}", id),
            Self::Global => "global".to_string(),
        }
    }

    pub fn artist_id(&self) -> Option<u64> {
        match self {
            Self::Artist(id) => Some(*id),
            Self::Global => None,
        }
    }

    fn from_key(key: &str) -> Result<Self, EngineError> {
        if key == "global" {
            return Ok(Self::Global);
        }
        key.strip_prefix("artist:")
            .and_then(|id| id.parse::<u64>().ok())
            .map(Self::Artist)
            .ok_or_else(|| EngineError::Internal(format!("Unknown badge scope: {}", key)))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Badge row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeRow {
    pub user_address: String,
    pub badge_kind: BadgeKind,
    pub scope: Scope,
    pub awarded_at: i64,
    pub block_height: u64,
    pub metadata: serde_json::Value,
}

/// Raw column values, decoded into a `BadgeRow` outside the rusqlite closure
struct RawBadge {
    user_address: String,
    badge_kind: String,
    scope: String,
    awarded_at: i64,
    block_height: i64,
    metadata_json: String,
}

impl RawBadge {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_address: row.get("user_address")?,
            badge_kind: row.get("badge_kind")?,
            scope: row.get("scope")?,
            awarded_at: row.get("awarded_at")?,
            block_height: row.get("block_height")?,
            metadata_json: row.get("metadata_json")?,
        })
    }

    fn decode(self) -> Result<BadgeRow, EngineError> {
        Ok(BadgeRow {
            user_address: self.user_address,
            badge_kind: self.badge_kind.parse()?,
            scope: Scope::from_key(&self.scope)?,
            awarded_at: self.awarded_at,
            block_height: self.block_height as u64,
            metadata: serde_json::from_str(&self.metadata_json)?,
        })
    }
}

/// A candidate award
#[derive(Debug, Clone)]
pub struct NewAward<'a> {
    pub user_address: &'a str,
    pub badge_kind: BadgeKind,
    pub scope: Scope,
    pub awarded_at: i64,
    pub block_height: u64,
    pub metadata: serde_json::Value,
}

/// Outcome of an award attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AwardOutcome {
    pub awarded: bool,
}

/// Award a badge unless the (user, kind, scope) key already exists
pub fn try_award(conn: &Connection, award: &NewAward<'_>) -> Result<AwardOutcome, EngineError> {
    let metadata_json = serde_json::to_string(&award.metadata)?;

    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO badges (
            user_address, badge_kind, scope, artist_id,
            awarded_at, block_height, metadata_json
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            award.user_address,
            award.badge_kind.as_str(),
            award.scope.key(),
            award.scope.artist_id().map(|id| id as i64),
            award.awarded_at,
            award.block_height as i64,
            metadata_json,
        ],
    )?;

    if inserted == 0 {
        debug!(
            user = %award.user_address,
            badge = %award.badge_kind,
            scope = %award.scope,
            "Badge already held, award skipped"
        );
    }

    Ok(AwardOutcome {
        awarded: inserted > 0,
    })
}

/// Get a single award by key
pub fn get_badge(
    conn: &Connection,
    user_address: &str,
    badge_kind: BadgeKind,
    scope: Scope,
) -> Result<Option<BadgeRow>, EngineError> {
    conn.query_row(
        "SELECT * FROM badges WHERE user_address = ? AND badge_kind = ? AND scope = ?",
        params![user_address, badge_kind.as_str(), scope.key()],
        |row| RawBadge::from_row(row),
    )
    .optional()?
    .map(RawBadge::decode)
    .transpose()
}

/// All awards held by a user, oldest first
pub fn badges_for_user(conn: &Connection, user_address: &str) -> Result<Vec<BadgeRow>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM badges WHERE user_address = ? ORDER BY awarded_at, rowid",
    )?;
    let raw = stmt
        .query_map(params![user_address], |row| RawBadge::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawBadge::decode).collect()
}

/// All awards scoped to an artist, oldest first
pub fn badges_for_artist(conn: &Connection, artist_id: u64) -> Result<Vec<BadgeRow>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM badges WHERE artist_id = ? ORDER BY awarded_at, rowid",
    )?;
    let raw = stmt
        .query_map(params![artist_id as i64], |row| RawBadge::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawBadge::decode).collect()
}

/// Number of awards of one kind within a scope
pub fn count_awards(conn: &Connection, badge_kind: BadgeKind, scope: Scope) -> Result<u64, EngineError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM badges WHERE badge_kind = ? AND scope = ?",
        params![badge_kind.as_str(), scope.key()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

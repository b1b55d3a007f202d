//! Badge rules
//!
//! The rule set is closed: each variant of [`Rule`] is one fixed badge shape.
//! Rules run after the holder ledger and snapshot log have been updated for
//! the current event. They read ledger state and write only through
//! [`badges::try_award`], so the badge ledger's key uniqueness is what keeps
//! awards single even when a rule keeps re-qualifying.

mod crossing;
mod dip;
mod first_backers;
mod genre;
mod supply_share;

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::config::RuleThresholds;
use crate::db::badges::{self, BadgeKind, NewAward, Scope};
use crate::db::EngineDb;
use crate::error::EngineError;
use crate::event::PurchaseEvent;

/// Denominator for basis-point thresholds
pub const BPS_SCALE: u128 = 10_000;

/// The five badge rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    FirstBackers,
    HolderCrossing,
    DipBuyer,
    GenreDiversity,
    SupplyShare,
}

impl Rule {
    pub const ALL: [Rule; 5] = [
        Rule::FirstBackers,
        Rule::HolderCrossing,
        Rule::DipBuyer,
        Rule::GenreDiversity,
        Rule::SupplyShare,
    ];

    /// Badge this rule awards
    pub fn badge_kind(&self) -> BadgeKind {
        match self {
            Self::FirstBackers => BadgeKind::FirstBacker,
            Self::HolderCrossing => BadgeKind::EarlyBeliever,
            Self::DipBuyer => BadgeKind::DipBuyer,
            Self::GenreDiversity => BadgeKind::GenreExplorer,
            Self::SupplyShare => BadgeKind::Whale,
        }
    }

    pub fn evaluate(&self, db: &EngineDb, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
        match self {
            Self::FirstBackers => first_backers::evaluate(db, ctx),
            Self::HolderCrossing => crossing::evaluate(db, ctx),
            Self::DipBuyer => dip::evaluate(db, ctx),
            Self::GenreDiversity => genre::evaluate(db, ctx),
            Self::SupplyShare => supply_share::evaluate(db, ctx),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FirstBackers => "first_backers",
            Self::HolderCrossing => "holder_crossing",
            Self::DipBuyer => "dip_buyer",
            Self::GenreDiversity => "genre_diversity",
            Self::SupplyShare => "supply_share",
        };
        f.write_str(name)
    }
}

/// State a rule sees for one event
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// The validated, normalized event
    pub event: &'a PurchaseEvent,
    /// Fingerprint of the event, as stored with its snapshot
    pub event_key: &'a str,
    /// Distinct holders of the event's artist after this event
    pub holder_count: u64,
    pub thresholds: &'a RuleThresholds,
}

/// Result of evaluating one rule for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "users", rename_all = "snake_case")]
pub enum RuleOutcome {
    /// Badges newly written, by recipient
    Awarded(Vec<String>),
    /// The rule qualified but every recipient already held the badge
    AlreadyHeld,
    NotEligible,
    /// Required snapshot history does not exist yet
    MissingHistory,
    /// The rule is undefined for this event (zero denominator)
    Skipped,
}

impl RuleOutcome {
    pub fn awarded_users(&self) -> &[String] {
        match self {
            Self::Awarded(users) => users,
            _ => &[],
        }
    }
}

/// Award `kind` in `scope` to the event's buyer
fn award_buyer(
    db: &EngineDb,
    ctx: &RuleContext<'_>,
    kind: BadgeKind,
    scope: Scope,
    metadata: serde_json::Value,
) -> Result<RuleOutcome, EngineError> {
    let outcome = db.with_conn(|conn| {
        badges::try_award(
            conn,
            &NewAward {
                user_address: &ctx.event.buyer,
                badge_kind: kind,
                scope,
                awarded_at: ctx.event.timestamp,
                block_height: ctx.event.block_height,
                metadata,
            },
        )
    })?;

    Ok(if outcome.awarded {
        RuleOutcome::Awarded(vec![ctx.event.buyer.clone()])
    } else {
        RuleOutcome::AlreadyHeld
    })
}

/// True when a counter moved from below `threshold` to at or above it
pub fn crossed(previous: u64, current: u64, threshold: u64) -> bool {
    previous < threshold && threshold <= current
}

/// Compare `numerator / denominator` against `bps / 10_000` without floats.
///
/// On multiplication overflow both operands are halved until the products
/// fit; this only loses precision for values near the top of the u128 range.
pub fn compare_ratio_bps(numerator: u128, denominator: u128, bps: u128) -> Ordering {
    let (mut n, mut d) = (numerator, denominator);
    loop {
        match (n.checked_mul(BPS_SCALE), d.checked_mul(bps)) {
            (Some(lhs), Some(rhs)) => return lhs.cmp(&rhs),
            _ => {
                n >>= 1;
                d >>= 1;
            }
        }
    }
}

/// `numerator / denominator` as a percentage rounded to two decimals
pub fn percent(numerator: u128, denominator: u128) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    let raw = numerator as f64 / denominator as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

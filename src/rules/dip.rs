//! Dip buyer: the buyer bought at a price well below the price one lookback
//! window earlier.

use std::cmp::Ordering;

use serde_json::json;

use super::{award_buyer, compare_ratio_bps, percent, RuleContext, RuleOutcome, BPS_SCALE};
use crate::db::badges::{BadgeKind, Scope};
use crate::db::{snapshots, EngineDb};
use crate::error::EngineError;

pub(super) fn evaluate(db: &EngineDb, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
    let event = ctx.event;
    let cutoff = event.timestamp.saturating_sub(ctx.thresholds.dip_lookback_secs);

    let reference = match db.with_conn(|conn| snapshots::most_recent_before(conn, event.artist_id, cutoff))? {
        Some(snapshot) => snapshot,
        None => return Ok(RuleOutcome::MissingHistory),
    };

    if reference.price == 0 {
        return Ok(RuleOutcome::Skipped);
    }

    // current / before <= 1 - dip
    let max_ratio_bps = BPS_SCALE - u128::from(ctx.thresholds.dip_threshold_bps);
    if compare_ratio_bps(event.new_price, reference.price, max_ratio_bps) == Ordering::Greater {
        return Ok(RuleOutcome::NotEligible);
    }

    let dip_percent = ((100.0 - percent(event.new_price, reference.price)) * 100.0).round() / 100.0;

    award_buyer(
        db,
        ctx,
        BadgeKind::DipBuyer,
        Scope::Artist(event.artist_id),
        json!({
            "price_before": reference.price.to_string(),
            "price_after": event.new_price.to_string(),
            "dip_percent": dip_percent,
        }),
    )
}

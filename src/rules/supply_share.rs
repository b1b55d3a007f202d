//! Supply share: a single purchase acquired a large fraction of the
//! post-purchase supply. Accumulated holdings do not count.

use std::cmp::Ordering;

use serde_json::json;

use super::{award_buyer, compare_ratio_bps, percent, RuleContext, RuleOutcome};
use crate::db::badges::{BadgeKind, Scope};
use crate::db::EngineDb;
use crate::error::EngineError;

pub(super) fn evaluate(db: &EngineDb, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
    let event = ctx.event;
    if event.new_supply == 0 {
        return Ok(RuleOutcome::Skipped);
    }

    let threshold = u128::from(ctx.thresholds.share_threshold_bps);
    if compare_ratio_bps(event.token_amount, event.new_supply, threshold) == Ordering::Less {
        return Ok(RuleOutcome::NotEligible);
    }

    award_buyer(
        db,
        ctx,
        BadgeKind::Whale,
        Scope::Artist(event.artist_id),
        json!({
            "share_percent": percent(event.token_amount, event.new_supply),
            "token_amount": event.token_amount.to_string(),
            "total_supply": event.new_supply.to_string(),
        }),
    )
}

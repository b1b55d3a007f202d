//! First backers: the buyer is among the first N distinct holders.
//!
//! Rank comes from the buyer's own holder record, not the artist's current
//! holder count, so a retried purchase still qualifies after later buyers.

use serde_json::json;

use super::{award_buyer, RuleContext, RuleOutcome};
use crate::db::badges::{BadgeKind, Scope};
use crate::db::{holders, EngineDb};
use crate::error::EngineError;

pub(super) fn evaluate(db: &EngineDb, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
    let limit = ctx.thresholds.first_backer_limit;
    let rank = db.with_conn(|conn| holders::holder_rank(conn, ctx.event.artist_id, &ctx.event.buyer))?;

    let rank = match rank {
        Some(rank) if rank <= limit => rank,
        _ => return Ok(RuleOutcome::NotEligible),
    };

    award_buyer(
        db,
        ctx,
        BadgeKind::FirstBacker,
        Scope::Artist(ctx.event.artist_id),
        json!({ "rank": rank }),
    )
}

//! Genre diversity: the buyer holds artists spanning enough distinct genres.
//!
//! Re-evaluated on every purchase by the buyer; the global-scope award key
//! keeps it to one badge.

use serde_json::json;

use super::{award_buyer, RuleContext, RuleOutcome};
use crate::db::badges::{BadgeKind, Scope};
use crate::db::{holders, EngineDb};
use crate::error::EngineError;

pub(super) fn evaluate(db: &EngineDb, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
    let genres = db.with_conn(|conn| holders::genres_held_by(conn, &ctx.event.buyer))?;

    if genres.len() < ctx.thresholds.genre_threshold {
        return Ok(RuleOutcome::NotEligible);
    }

    award_buyer(
        db,
        ctx,
        BadgeKind::GenreExplorer,
        Scope::Global,
        json!({
            "genre_count": genres.len(),
            "genres": genres,
        }),
    )
}

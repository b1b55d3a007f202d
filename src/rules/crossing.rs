//! Holder crossing: when an artist's holder count first reaches the
//! threshold, every early holder is rewarded at once.
//!
//! The transition is read from the snapshot log: this event's own snapshot
//! must reach the threshold and the one appended just before it must sit
//! below. Normally those are the last two snapshots. A redelivered event
//! finds its own by fingerprint, so retrying a crossing event after later
//! purchases still sees its own transition.
//! Without two snapshots there is no transition to detect.

use serde_json::json;
use tracing::info;

use super::{crossed, RuleContext, RuleOutcome};
use crate::db::badges::{self, BadgeKind, NewAward, Scope};
use crate::db::{holders, snapshots, EngineDb};
use crate::error::EngineError;

pub(super) fn evaluate(db: &EngineDb, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
    let artist_id = ctx.event.artist_id;
    let threshold = ctx.thresholds.crossing_threshold;

    let pair = db.with_conn(|conn| {
        // In-order delivery: this event's snapshot is the latest
        if let (Some(latest), previous) = snapshots::last_two(conn, artist_id)? {
            if latest.event_key.as_deref() == Some(ctx.event_key) {
                return Ok(previous.map(|previous| (latest, previous)));
            }
        }

        let current = match snapshots::for_event(conn, artist_id, ctx.event_key)? {
            Some(current) => current,
            None => return Ok(None),
        };
        Ok(snapshots::preceding(conn, artist_id, current.id)?.map(|previous| (current, previous)))
    })?;

    let (current, previous) = match pair {
        Some(pair) => pair,
        None => return Ok(RuleOutcome::MissingHistory),
    };

    if !crossed(previous.holder_count, current.holder_count, threshold) {
        return Ok(RuleOutcome::NotEligible);
    }

    // All early-holder awards commit together or not at all.
    let awarded = db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let mut awarded = Vec::new();

        for holder in holders::early_holders(&tx, artist_id)? {
            let outcome = badges::try_award(
                &tx,
                &NewAward {
                    user_address: &holder.user_address,
                    badge_kind: BadgeKind::EarlyBeliever,
                    scope: Scope::Artist(artist_id),
                    awarded_at: ctx.event.timestamp,
                    block_height: ctx.event.block_height,
                    metadata: json!({
                        "crossing_holder_count": current.holder_count,
                        "first_purchase_block": holder.first_purchase_block,
                    }),
                },
            )?;
            if outcome.awarded {
                awarded.push(holder.user_address);
            }
        }

        tx.commit()?;
        Ok(awarded)
    })?;

    info!(
        artist_id,
        holder_count = current.holder_count,
        rewarded = awarded.len(),
        "Artist crossed holder threshold"
    );

    Ok(if awarded.is_empty() {
        RuleOutcome::AlreadyHeld
    } else {
        RuleOutcome::Awarded(awarded)
    })
}

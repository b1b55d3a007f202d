//! Event processor
//!
//! Applies one purchase event at a time:
//!
//! 1. validate the event and normalize the buyer address
//! 2. record the purchase in the holder ledger
//! 3. append a snapshot with the post-update holder count
//! 4. evaluate every badge rule against the updated ledgers
//!
//! A failure in steps 1-3 aborts the event and the caller retries it from
//! scratch. Holder inserts and awards are keyed, and the snapshot append is
//! skipped when the event's fingerprint is already in the log, so a retry
//! never duplicates state. A failing rule is reported and logged; the other
//! rules still run.
//!
//! Processing is serialized per artist, and per buyer inside that, so the
//! snapshot queries see in-order history and two events of the same buyer
//! never evaluate the genre rule side by side. The lock order is always
//! artist then buyer. Lock entries live only while some event holds or
//! waits on them, so the maps stay bounded by in-flight work.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::{EngineEvent, EventBus};
use crate::config::{EngineConfig, RuleThresholds};
use crate::db::artists::{self, ArtistRow};
use crate::db::badges::{self, BadgeRow};
use crate::db::holders::{self, HolderRow};
use crate::db::snapshots::{self, NewSnapshot, SnapshotRow};
use crate::db::EngineDb;
use crate::error::EngineError;
use crate::event::{normalize_address, PurchaseEvent};
use crate::rules::{Rule, RuleContext, RuleOutcome};

/// Outcome of a single rule for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule: Rule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RuleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What processing one event did
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub artist_id: u64,
    pub buyer: String,
    pub holder_count: u64,
    pub new_holder: bool,
    /// False when the event was a replay and its snapshot already existed
    pub snapshot_appended: bool,
    pub rules: Vec<RuleReport>,
}

impl ProcessReport {
    /// Badges newly written while processing this event
    pub fn awards(&self) -> impl Iterator<Item = (Rule, &str)> + '_ {
        self.rules.iter().flat_map(|report| {
            report
                .outcome
                .iter()
                .flat_map(|outcome| outcome.awarded_users())
                .map(move |user| (report.rule, user.as_str()))
        })
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleReport> + '_ {
        self.rules.iter().filter(|report| report.error.is_some())
    }
}

/// Holder count, metadata and recent snapshots of an artist
#[derive(Debug, Clone, Serialize)]
pub struct ArtistStats {
    pub artist_id: u64,
    pub artist: Option<ArtistRow>,
    pub holder_count: u64,
    pub history: Vec<SnapshotRow>,
}

/// Badge derivation engine entry point
pub struct EventProcessor {
    db: Arc<EngineDb>,
    thresholds: RuleThresholds,
    event_bus: Arc<EventBus>,
    artist_locks: DashMap<u64, Arc<Mutex<()>>>,
    buyer_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EventProcessor {
    pub fn new(db: Arc<EngineDb>, thresholds: RuleThresholds) -> Self {
        Self {
            db,
            thresholds,
            event_bus: Arc::new(EventBus::new()),
            artist_locks: DashMap::new(),
            buyer_locks: DashMap::new(),
        }
    }

    /// Open the ledger database described by `config`, creating its directory
    pub fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        config.rules.validate()?;
        std::fs::create_dir_all(&config.storage_dir)?;

        let db = Arc::new(EngineDb::open(&config.database_path())?);
        Ok(Self::new(db, config.rules.clone())
            .with_event_bus(Arc::new(EventBus::with_capacity(config.event_bus_capacity))))
    }

    /// Publish engine events on a shared bus
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn db(&self) -> &Arc<EngineDb> {
        &self.db
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn thresholds(&self) -> &RuleThresholds {
        &self.thresholds
    }

    /// Register an artist, or set its genre
    pub fn register_artist(&self, artist_id: u64, genre: Option<&str>) -> Result<ArtistRow, EngineError> {
        let row = self
            .db
            .with_conn(|conn| artists::register_artist(conn, artist_id, genre))?;
        info!(artist_id, genre = ?row.genre, "Artist registered");
        Ok(row)
    }

    /// Apply one purchase event to the ledgers and evaluate all badge rules
    pub fn process_purchase_event(&self, event: &PurchaseEvent) -> Result<ProcessReport, EngineError> {
        let event = event.normalized()?;

        let artist_lock = lock_for(&self.artist_locks, event.artist_id);
        let buyer_lock = lock_for(&self.buyer_locks, event.buyer.clone());
        let result = self.process_locked(&event, &artist_lock, &buyer_lock);

        drop(artist_lock);
        drop(buyer_lock);
        release_lock(&self.artist_locks, &event.artist_id);
        release_lock(&self.buyer_locks, &event.buyer);

        result
    }

    fn process_locked(
        &self,
        event: &PurchaseEvent,
        artist_lock: &Mutex<()>,
        buyer_lock: &Mutex<()>,
    ) -> Result<ProcessReport, EngineError> {
        let _artist_guard = artist_lock
            .lock()
            .map_err(|e| EngineError::Internal(format!("Artist lock poisoned: {}", e)))?;
        let _buyer_guard = buyer_lock
            .lock()
            .map_err(|e| EngineError::Internal(format!("Buyer lock poisoned: {}", e)))?;

        debug!(
            artist_id = event.artist_id,
            buyer = %event.buyer,
            block = event.block_height,
            "Processing purchase"
        );

        let recorded = self.db.with_conn_mut(|conn| {
            holders::record_purchase(
                conn,
                event.artist_id,
                &event.buyer,
                event.block_height,
                event.timestamp,
                self.thresholds.early_holder_limit,
            )
        })?;

        if recorded.new_holder {
            self.event_bus.emit(EngineEvent::HolderAdded {
                artist_id: event.artist_id,
                user_address: event.buyer.clone(),
                holder_count: recorded.holder_count,
                early_holder: recorded.early_holder,
            });
        }

        let event_key = event.fingerprint();
        let snapshot_appended = self.append_snapshot_once(event, &event_key, recorded.holder_count)?;

        let ctx = RuleContext {
            event,
            event_key: &event_key,
            holder_count: recorded.holder_count,
            thresholds: &self.thresholds,
        };
        let rules = Rule::ALL
            .iter()
            .map(|rule| self.run_rule(*rule, &ctx))
            .collect();

        Ok(ProcessReport {
            artist_id: event.artist_id,
            buyer: event.buyer.clone(),
            holder_count: recorded.holder_count,
            new_holder: recorded.new_holder,
            snapshot_appended,
            rules,
        })
    }

    /// Append this event's snapshot unless a previous delivery already did
    fn append_snapshot_once(
        &self,
        event: &PurchaseEvent,
        event_key: &str,
        holder_count: u64,
    ) -> Result<bool, EngineError> {
        let appended = self.db.with_conn(|conn| {
            if snapshots::contains_event(conn, event.artist_id, event_key)? {
                return Ok(false);
            }
            snapshots::append_snapshot(
                conn,
                &NewSnapshot {
                    artist_id: event.artist_id,
                    block_height: event.block_height,
                    price: event.new_price,
                    holder_count,
                    timestamp: event.timestamp,
                    event_key: Some(event_key),
                },
            )?;
            Ok(true)
        })?;

        if appended {
            self.event_bus.emit(EngineEvent::SnapshotAppended {
                artist_id: event.artist_id,
                block_height: event.block_height,
                holder_count,
            });
        } else {
            debug!(
                artist_id = event.artist_id,
                block = event.block_height,
                "Replayed event, snapshot already recorded"
            );
        }
        Ok(appended)
    }

    fn run_rule(&self, rule: Rule, ctx: &RuleContext<'_>) -> RuleReport {
        match rule.evaluate(&self.db, ctx) {
            Ok(outcome) => {
                let kind = rule.badge_kind();
                for user in outcome.awarded_users() {
                    self.event_bus.emit(EngineEvent::BadgeAwarded {
                        user_address: user.clone(),
                        badge_kind: kind,
                        scope: scope_for(rule, ctx.event.artist_id),
                        awarded_at: ctx.event.timestamp,
                    });
                }
                RuleReport {
                    rule,
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) => {
                warn!(rule = %rule, artist_id = ctx.event.artist_id, error = %e, "Rule evaluation failed");
                self.event_bus.emit(EngineEvent::RuleFailed {
                    rule,
                    artist_id: ctx.event.artist_id,
                    error: e.to_string(),
                });
                RuleReport {
                    rule,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// All badges held by a user
    pub fn badges_for_user(&self, user_address: &str) -> Result<Vec<BadgeRow>, EngineError> {
        let user = normalize_address(user_address)?;
        self.db.with_conn(|conn| badges::badges_for_user(conn, &user))
    }

    /// All badges scoped to an artist
    pub fn badges_for_artist(&self, artist_id: u64) -> Result<Vec<BadgeRow>, EngineError> {
        self.db.with_conn(|conn| badges::badges_for_artist(conn, artist_id))
    }

    /// Holders of an artist in first-purchase order
    pub fn holders_of(&self, artist_id: u64) -> Result<Vec<HolderRow>, EngineError> {
        self.db.with_conn(|conn| holders::list_holders(conn, artist_id))
    }

    /// Holder count, metadata and the latest `history_limit` snapshots
    pub fn artist_stats(&self, artist_id: u64, history_limit: u32) -> Result<ArtistStats, EngineError> {
        self.db.with_conn(|conn| {
            Ok(ArtistStats {
                artist_id,
                artist: artists::get_artist(conn, artist_id)?,
                holder_count: holders::holder_count(conn, artist_id)?,
                history: snapshots::history(conn, artist_id, history_limit)?,
            })
        })
    }
}

fn lock_for<K>(locks: &DashMap<K, Arc<Mutex<()>>>, key: K) -> Arc<Mutex<()>>
where
    K: Eq + std::hash::Hash,
{
    locks.entry(key).or_default().clone()
}

/// Drop a lock entry nobody else holds or waits on
fn release_lock<K>(locks: &DashMap<K, Arc<Mutex<()>>>, key: &K)
where
    K: Eq + std::hash::Hash,
{
    locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

fn scope_for(rule: Rule, artist_id: u64) -> badges::Scope {
    match rule {
        Rule::GenreDiversity => badges::Scope::Global,
        _ => badges::Scope::Artist(artist_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::badges::{BadgeKind, Scope};

    fn processor() -> EventProcessor {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        EventProcessor::new(db, RuleThresholds::default())
    }

    fn user(n: u64) -> String {
        format!("0x{:040x}", n)
    }

    fn purchase(artist_id: u64, buyer: &str, block: u64) -> PurchaseEvent {
        PurchaseEvent {
            artist_id,
            buyer: buyer.to_string(),
            token_amount: 10,
            new_supply: 1_000_000,
            new_price: 1_000,
            block_height: block,
            timestamp: 1_700_000_000 + block as i64,
        }
    }

    #[test]
    fn test_report_for_first_purchase() {
        let processor = processor();
        let report = processor.process_purchase_event(&purchase(1, &user(1), 1)).unwrap();

        assert_eq!(report.holder_count, 1);
        assert!(report.new_holder);
        assert!(report.snapshot_appended);
        assert_eq!(report.rules.len(), 5);
        assert_eq!(report.failed_rules().count(), 0);

        let awards: Vec<_> = report.awards().collect();
        assert_eq!(awards, vec![(Rule::FirstBackers, user(1).as_str())]);
    }

    #[test]
    fn test_uppercase_buyer_is_normalized() {
        let processor = processor();
        let shouting = user(0xab).to_uppercase().replacen("0X", "0x", 1);
        processor.process_purchase_event(&purchase(1, &shouting, 1)).unwrap();

        let held = processor.badges_for_user(&user(0xab)).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].user_address, user(0xab));
    }

    #[test]
    fn test_malformed_event_changes_nothing() {
        let processor = processor();
        let result = processor.process_purchase_event(&purchase(1, "", 1));

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(processor.db().stats().unwrap().snapshot_count, 0);
        assert_eq!(processor.db().stats().unwrap().artist_count, 0);
    }

    #[test]
    fn test_replay_skips_snapshot() {
        let processor = processor();
        let event = purchase(1, &user(1), 1);

        let first = processor.process_purchase_event(&event).unwrap();
        let replay = processor.process_purchase_event(&event).unwrap();

        assert!(first.snapshot_appended);
        assert!(!replay.snapshot_appended);
        assert_eq!(replay.awards().count(), 0);
        assert_eq!(processor.db().stats().unwrap().snapshot_count, 1);
        assert_eq!(
            processor.badges_for_artist(1).unwrap()[0].badge_kind,
            BadgeKind::FirstBacker
        );
    }

    #[test]
    fn test_same_block_purchases_keep_both_snapshots() {
        let processor = processor();
        processor.process_purchase_event(&purchase(1, &user(1), 5)).unwrap();
        processor.process_purchase_event(&purchase(1, &user(2), 5)).unwrap();

        assert_eq!(processor.artist_stats(1, 10).unwrap().history.len(), 2);
    }

    #[test]
    fn test_unknown_artist_gets_placeholder() {
        let processor = processor();
        processor.process_purchase_event(&purchase(77, &user(1), 1)).unwrap();

        let stats = processor.artist_stats(77, 10).unwrap();
        assert_eq!(stats.artist, Some(ArtistRow { artist_id: 77, genre: None }));
        assert_eq!(stats.holder_count, 1);
    }

    #[test]
    fn test_events_reach_the_bus() {
        let processor = processor();
        let mut receiver = processor.event_bus().subscribe();
        processor.process_purchase_event(&purchase(1, &user(1), 1)).unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            seen.push(event);
        }

        assert!(seen.contains(&EngineEvent::BadgeAwarded {
            user_address: user(1),
            badge_kind: BadgeKind::FirstBacker,
            scope: Scope::Artist(1),
            awarded_at: 1_700_000_001,
        }));
        assert!(matches!(seen[0], EngineEvent::HolderAdded { holder_count: 1, .. }));
    }

    #[test]
    fn test_failing_rule_does_not_stop_the_others() {
        let processor = processor();
        let mut receiver = processor.event_bus().subscribe();
        processor
            .db()
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER block_whale BEFORE INSERT ON badges
                     WHEN NEW.badge_kind = 'whale'
                     BEGIN SELECT RAISE(ABORT, 'whale writes disabled'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let event = PurchaseEvent {
            token_amount: 500_000,
            ..purchase(1, &user(1), 1)
        };
        let report = processor.process_purchase_event(&event).unwrap();

        assert_eq!(report.rules.len(), 5);
        let failed: Vec<_> = report.failed_rules().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].rule, Rule::SupplyShare);
        assert!(failed[0].outcome.is_none());
        assert!(failed[0].error.as_deref().unwrap().contains("whale writes disabled"));

        let awards: Vec<_> = report.awards().collect();
        assert_eq!(awards, vec![(Rule::FirstBackers, user(1).as_str())]);
        assert!(report.rules.iter().any(|r| r.rule == Rule::DipBuyer && r.outcome == Some(RuleOutcome::MissingHistory)));

        let mut seen = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|e| matches!(
            e,
            EngineEvent::RuleFailed { rule: Rule::SupplyShare, artist_id: 1, .. }
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            EngineEvent::BadgeAwarded { badge_kind: BadgeKind::FirstBacker, .. }
        )));
    }

    #[test]
    fn test_lock_entries_released_after_processing() {
        let processor = processor();
        for n in 1..=20 {
            processor.process_purchase_event(&purchase(n % 3, &user(n), n)).unwrap();
        }

        assert!(processor.artist_locks.is_empty());
        assert!(processor.buyer_locks.is_empty());
    }

    #[test]
    fn test_lock_entry_kept_while_held() {
        let processor = processor();
        let held = lock_for(&processor.artist_locks, 9);

        release_lock(&processor.artist_locks, &9);
        assert_eq!(processor.artist_locks.len(), 1);

        drop(held);
        release_lock(&processor.artist_locks, &9);
        assert!(processor.artist_locks.is_empty());
    }
}

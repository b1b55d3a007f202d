//! Badge Engine - social-proof state derived from artist token purchases
//!
//! Consumes purchase events from a bonding-curve market and keeps three
//! ledgers up to date:
//!
//! - **Holder ledger**: first purchase of every (artist, user) pair, with an
//!   "early holder" flag fixed at creation
//! - **Snapshot log**: per-artist price / holder-count series
//! - **Badge ledger**: append-only awards, unique per (user, badge, scope)
//!
//! ## Processing
//!
//! ```text
//! PurchaseEvent ─▶ validate ─▶ holder ledger ─▶ snapshot log ─▶ rules ─▶ badge ledger
//!                                                                  │
//!                                                                  └─▶ EventBus
//! ```
//!
//! Delivery is at-least-once: every step is safe to repeat for the same
//! event, so a failed event is simply processed again.
//!
//! ## Badges
//!
//! | Badge | Scope | Trigger |
//! |-------|-------|---------|
//! | `first_backer` | artist | one of the first 5 distinct holders |
//! | `early_believer` | artist | early holder when the artist reaches 200 holders |
//! | `dip_buyer` | artist | bought 15% below the price one hour earlier |
//! | `genre_explorer` | global | holds artists across 8 genres |
//! | `whale` | artist | one purchase of at least 1% of supply |

pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod processor;
pub mod rules;

// Re-exports
pub use bus::{EngineEvent, EventBus};
pub use config::{EngineConfig, RuleThresholds};
pub use db::{AwardOutcome, BadgeKind, BadgeRow, EngineDb, HolderRow, Scope, SnapshotRow};
pub use error::EngineError;
pub use event::PurchaseEvent;
pub use processor::{ArtistStats, EventProcessor, ProcessReport, RuleReport};
pub use rules::{Rule, RuleOutcome};

//! Event bus for engine state changes
//!
//! Lets the outer layers (notifications, caches, the presentation API)
//! follow holder, snapshot and badge changes without polling the ledgers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::db::badges::{BadgeKind, Scope};
use crate::rules::Rule;

/// Engine events emitted while processing purchases
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    HolderAdded {
        artist_id: u64,
        user_address: String,
        holder_count: u64,
        early_holder: bool,
    },
    SnapshotAppended {
        artist_id: u64,
        block_height: u64,
        holder_count: u64,
    },
    BadgeAwarded {
        user_address: String,
        badge_kind: BadgeKind,
        scope: Scope,
        awarded_at: i64,
    },
    RuleFailed {
        rule: Rule,
        artist_id: u64,
        error: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Broadcast bus for engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::BadgeAwarded {
                user_address,
                badge_kind,
                scope,
                awarded_at,
            } => {
                let at = DateTime::<Utc>::from_timestamp(*awarded_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| awarded_at.to_string());
                info!(user = %user_address, badge = %badge_kind, scope = %scope, awarded_at = %at, "Badge awarded");
            }
            EngineEvent::HolderAdded {
                artist_id,
                user_address,
                holder_count,
                ..
            } => {
                debug!(artist_id, user = %user_address, holder_count, "Holder added");
            }
            EngineEvent::RuleFailed { rule, artist_id, error } => {
                warn!(rule = %rule, artist_id, error = %error, "Rule evaluation failed");
            }
            _ => {
                trace!(event = ?event, "Engine event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(EngineEvent::BadgeAwarded {
            user_address: "0xaa".into(),
            badge_kind: BadgeKind::Whale,
            scope: Scope::Artist(3),
            awarded_at: 1_700_000_000,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            EngineEvent::BadgeAwarded { user_address, badge_kind, .. } => {
                assert_eq!(user_address, "0xaa");
                assert_eq!(badge_kind, BadgeKind::Whale);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(EngineEvent::SnapshotAppended {
            artist_id: 1,
            block_height: 1,
            holder_count: 1,
        });
    }

    #[tokio::test]
    async fn test_logging_listener_drains_after_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let listener = spawn_logging_listener(Arc::clone(&bus));
        assert_eq!(bus.subscriber_count(), 1);

        for height in 0..3 {
            bus.emit(EngineEvent::SnapshotAppended {
                artist_id: 1,
                block_height: height,
                holder_count: 1,
            });
        }
        drop(bus);

        timeout(Duration::from_millis(500), listener)
            .await
            .expect("listener did not stop")
            .expect("listener panicked");
    }
}

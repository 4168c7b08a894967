//! Event types for the cadence event system
//!
//! Provides session lifecycle event definitions and the `EventBus` used to
//! fan them out. Events are notifications (a track started, the queue
//! changed); the authoritative state is always the `PlaybackSnapshot`.

mod queue_types;

pub use queue_types::QueueChangeTrigger;

use crate::snapshot::{RepeatMode, TransportStatus};
use crate::track::TrackId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Session lifecycle events
///
/// Broadcast via `EventBus` and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Transport status changed
    StatusChanged {
        session_id: Uuid,
        old_status: TransportStatus,
        new_status: TransportStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new item became current on the transport
    ///
    /// Triggers:
    /// - Catalog: increment play count
    /// - SSE: update now-playing displays
    TrackStarted {
        session_id: Uuid,
        track_id: TrackId,
        queue_index: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents or order changed
    QueueChanged {
        session_id: Uuid,
        length: usize,
        cursor: Option<usize>,
        trigger: QueueChangeTrigger,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Shuffle or repeat policy changed
    PolicyChanged {
        session_id: Uuid,
        shuffle_enabled: bool,
        repeat_mode: RepeatMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Favorite flag of a track changed in the catalog
    FavoriteChanged {
        session_id: Uuid,
        track_id: TrackId,
        favorite: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The transport reported a failure
    TransportFault {
        session_id: Uuid,
        track_id: Option<TrackId>,
        kind: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The hosting process was authorized to tear the session down
    TeardownAuthorized {
        session_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SessionEvent {
    /// Event type string (SSE `event:` field)
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::StatusChanged { .. } => "StatusChanged",
            SessionEvent::TrackStarted { .. } => "TrackStarted",
            SessionEvent::QueueChanged { .. } => "QueueChanged",
            SessionEvent::PolicyChanged { .. } => "PolicyChanged",
            SessionEvent::FavoriteChanged { .. } => "FavoriteChanged",
            SessionEvent::TransportFault { .. } => "TransportFault",
            SessionEvent::TeardownAuthorized { .. } => "TeardownAuthorized",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the session worker)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// Subscribers only see events emitted after they subscribe. Consumers that
/// need the current state read the snapshot instead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Events beyond `capacity` unread by a subscriber are dropped for that
    /// subscriber (it observes `RecvError::Lagged`).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SessionEvent,
    ) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(old: TransportStatus, new: TransportStatus) -> SessionEvent {
        SessionEvent::StatusChanged {
            session_id: Uuid::new_v4(),
            old_status: old,
            new_status: new,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus
            .emit(status_event(TransportStatus::Idle, TransportStatus::Loading))
            .unwrap();
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                SessionEvent::StatusChanged { new_status, .. } => {
                    assert_eq!(new_status, TransportStatus::Loading)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_an_error_but_lossy_is_not() {
        let bus = EventBus::new(4);
        assert!(bus
            .emit(status_event(TransportStatus::Idle, TransportStatus::Loading))
            .is_err());
        bus.emit_lossy(status_event(TransportStatus::Loading, TransportStatus::Playing));
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(status_event(
            TransportStatus::Playing,
            TransportStatus::Paused,
        ))
        .unwrap();
        assert_eq!(json["type"], "StatusChanged");
        assert_eq!(json["new_status"], "paused");
    }
}

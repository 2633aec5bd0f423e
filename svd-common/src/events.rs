//! Observer events for the decode engine
//!
//! Provides the event enum emitted by voices and the batch scheduler, and the
//! broadcast `EventBus` that carries them to observers (authoring tools,
//! diagnostics overlays, gapless chain controllers).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine event types
///
/// Events are broadcast via EventBus and can be serialized for external
/// introspection tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Playback position update for a voice with position notifications enabled
    PlaybackPosition {
        /// Voice that advanced
        voice_id: Uuid,
        /// Current source frame after the refill
        frame: u64,
        /// Total source frames of the media
        total_frames: u64,
        /// When the refill completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A cue marker was passed during a refill
    MarkerReached {
        /// Voice that passed the marker
        voice_id: Uuid,
        /// Marker identifier from the media header
        marker_id: u32,
        /// Source frame of the marker
        frame: u64,
        /// When the refill completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback wrapped from loop end back to loop start
    LoopWrapped {
        /// Voice that wrapped
        voice_id: Uuid,
        /// Remaining loop count after the wrap (0 = infinite, 1 = last pass)
        loop_count: u16,
        /// When the wrap happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The decoder has queued its final data; the next voice of a gapless
    /// chain may start decoding
    DecodeComplete {
        /// Voice whose decode finished
        voice_id: Uuid,
        /// When the final decode was queued
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Buffering diagnostic (starvation, retry, soft decode diagnostic)
    BufferingDiagnostic {
        /// Voice concerned
        voice_id: Uuid,
        /// Short machine-readable reason
        reason: String,
        /// When the condition was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A voice hit a fatal error and must be terminated by its owner
    VoiceFailed {
        /// Voice that failed
        voice_id: Uuid,
        /// Human-readable error
        error: String,
        /// Diagnostic code, if the failure carried one
        diagnostic: Option<String>,
        /// When the failure was detected
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A hardware batch resolved
    BatchResolved {
        /// Coprocessor batch identifier
        batch_id: u64,
        /// Final batch status
        status: String,
        /// Number of decoder instances that took part
        participants: usize,
        /// When the resolution was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    /// Short event name for log lines
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::PlaybackPosition { .. } => "PlaybackPosition",
            EngineEvent::MarkerReached { .. } => "MarkerReached",
            EngineEvent::LoopWrapped { .. } => "LoopWrapped",
            EngineEvent::DecodeComplete { .. } => "DecodeComplete",
            EngineEvent::BufferingDiagnostic { .. } => "BufferingDiagnostic",
            EngineEvent::VoiceFailed { .. } => "VoiceFailed",
            EngineEvent::BatchResolved { .. } => "BatchResolved",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, so the bus can be shared with async
/// observers while the decode thread emits synchronously.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Used for every per-tick notification: voices never fail because
    /// nobody observes them.
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_complete() -> EngineEvent {
        EngineEvent::DecodeComplete {
            voice_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(8);
        assert!(bus.emit(decode_complete()).is_err());
        // Lossy emit never fails
        bus.emit_lossy(decode_complete());
    }

    #[test]
    fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let event = decode_complete();
        assert_eq!(bus.emit(event.clone()).unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::LoopWrapped {
            voice_id: Uuid::nil(),
            loop_count: 1,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"LoopWrapped\""));
        assert!(json.contains("\"loop_count\":1"));

        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "LoopWrapped");
    }

    #[test]
    fn test_capacity_reported() {
        assert_eq!(EventBus::new(32).capacity(), 32);
    }
}

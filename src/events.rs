//! Session events delivered to the presentation layer
//!
//! Every user-visible change flows through one broadcast channel, so a
//! subscriber sees events in the order they were produced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::protocol::{AiState, Speaker};
use crate::tracking::{BoundingBox, TrackerUpdate};

/// Default number of events buffered per subscriber
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One completed utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Event emitted by the session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Human-readable status line
    Status { message: String },
    /// The assistant changed state
    AiState { state: AiState },
    /// A finished utterance from either speaker
    Transcript(Utterance),
    /// The model asked to highlight an object and a tracker was created
    ObjectHighlighted {
        tracker_id: String,
        label: String,
        bbox: BoundingBox,
        score: f32,
    },
    /// Result of one tracking pass
    Tracking { updates: HashMap<String, TrackerUpdate> },
}

/// Cloneable sender side of the event channel
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(SessionEvent::Status { message });
    }

    pub fn ai_state(&self, state: AiState) {
        self.emit(SessionEvent::AiState { state });
    }

    pub fn transcript(&self, speaker: Speaker, text: impl Into<String>) {
        self.emit(SessionEvent::Transcript(Utterance {
            speaker,
            text: text.into(),
            at: Utc::now(),
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        sink.status("Connecting...");
        sink.ai_state(AiState::Listening);
        sink.transcript(Speaker::User, "hello");

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Status { message } if message == "Connecting..."));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::AiState { state: AiState::Listening }));
        match rx.try_recv().unwrap() {
            SessionEvent::Transcript(u) => {
                assert_eq!(u.speaker, Speaker::User);
                assert_eq!(u.text, "hello");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let sink = EventSink::default();
        sink.status("nobody listening");
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event = SessionEvent::AiState { state: AiState::UsingTool };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "ai_state");
        assert_eq!(json["state"], "using_tool");
    }
}

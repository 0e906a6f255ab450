//! Detection events and their fan-out to observers.
//!
//! The detector speaks a line protocol of two tokens. Recognized lines become
//! [`DetectionEvent`]s published on a broadcast channel: every subscriber gets
//! its own queue, a slow subscriber skips messages instead of stalling the
//! publisher, and nothing is replayed to late joiners.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Queue depth per subscriber before it starts lagging.
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Motion state of a stream as last reported by its detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionStatus {
    #[default]
    Clear,
    Alarm,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "CLEAR",
            Self::Alarm => "ALARM",
        }
    }

    /// Parse one detector output line. Only the exact tokens are accepted,
    /// surrounding whitespace aside.
    pub fn parse_line(line: &str) -> Option<Self> {
        match line.trim() {
            "CLEAR" => Some(Self::Clear),
            "ALARM" => Some(Self::Alarm),
            _ => None,
        }
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub stream_id: String,
    pub status: DetectionStatus,
}

/// Messages pushed to websocket observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    /// Current state of every live stream, sent once on connect.
    Snapshot(Vec<DetectionEvent>),
    Detection(DetectionEvent),
}

/// Broadcast hub for detection events.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<DetectionEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Never blocks; returns how many observers were listening.
    pub fn publish(&self, event: DetectionEvent) -> usize {
        trace!(stream_id = %event.stream_id, status = %event.status, "Publishing detection event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ALARM", Some(DetectionStatus::Alarm))]
    #[case("CLEAR\r", Some(DetectionStatus::Clear))]
    #[case("  ALARM  ", Some(DetectionStatus::Alarm))]
    #[case("alarm", None)]
    #[case("ALARMING", None)]
    #[case("ERROR", None)]
    #[case("", None)]
    fn test_parse_line(#[case] line: &str, #[case] expected: Option<DetectionStatus>) {
        assert_eq!(DetectionStatus::parse_line(line), expected);
    }

    #[test]
    fn test_event_wire_format() {
        let event = DetectionEvent {
            stream_id: "1700000000000".to_string(),
            status: DetectionStatus::Alarm,
        };
        let json = serde_json::to_value(PushMessage::Detection(event)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "detection",
                "data": {"streamId": "1700000000000", "status": "ALARM"}
            })
        );
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let event = DetectionEvent {
            stream_id: "s".to_string(),
            status: DetectionStatus::Clear,
        };
        assert_eq!(hub.publish(event.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new();
        let delivered = hub.publish(DetectionEvent {
            stream_id: "s".to_string(),
            status: DetectionStatus::Alarm,
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let hub = EventHub::new();
        let mut slow = hub.subscribe();
        for _ in 0..(EVENT_BROADCAST_CAPACITY + 10) {
            hub.publish(DetectionEvent {
                stream_id: "s".to_string(),
                status: DetectionStatus::Alarm,
            });
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(10))
        ));
    }
}

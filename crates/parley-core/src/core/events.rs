//! Boundary events emitted to the UI.
//!
//! Events are serializable for a future JSON output mode. Assistant text
//! carries the full latest reply, not a delta: consumers replace the
//! rendered content rather than appending.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::routing::Target;
use crate::providers::shared::ToolInfo;

/// Events emitted by the debate coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    /// Full latest reply text from a backend (streamed or final).
    AssistantText { target: Target, content: String },

    /// A completed tool whose result the UI should render collapsibly.
    CliToolResult { tool_info: ToolInfo },

    /// A user-visible failure; the coordinator stays usable.
    Error { message: String },
}

/// Channel-based event sender (async, bounded).
pub type DebateEventTx = mpsc::Sender<Arc<DebateEvent>>;

/// Channel-based event receiver (async, bounded).
pub type DebateEventRx = mpsc::Receiver<Arc<DebateEvent>>;

/// Default channel capacity; generous so best-effort delta sends rarely
/// drop.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded event channel with the default capacity.
pub fn create_event_channel() -> (DebateEventTx, DebateEventRx) {
    mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}

/// Event sender with best-effort and reliable send modes.
///
/// `send_delta` never awaits and drops when the consumer lags; use it for
/// streamed text updates. `send_important` awaits delivery; use it for
/// tool results, final text, and errors.
#[derive(Clone)]
pub struct EventSender {
    tx: DebateEventTx,
}

impl EventSender {
    pub fn new(tx: DebateEventTx) -> Self {
        Self { tx }
    }

    /// Best-effort send: never awaits, drops if the channel is full.
    pub fn send_delta(&self, event: DebateEvent) {
        let _ = self.tx.try_send(Arc::new(event));
    }

    /// Reliable send: awaits delivery.
    pub async fn send_important(&self, event: DebateEvent) {
        let _ = self.tx.send(Arc::new(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::shared::{ToolInfo, ToolKind};

    #[test]
    fn events_serialize_tagged() {
        let event = DebateEvent::AssistantText {
            target: Target::Gemini,
            content: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"assistant_text""#));
        assert!(json.contains(r#""target":"gemini""#));

        let back: DebateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn tool_result_event_roundtrip() {
        let event = DebateEvent::CliToolResult {
            tool_info: ToolInfo::new(ToolKind::Shell, "ls"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DebateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn delta_sends_drop_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);

        sender.send_delta(DebateEvent::Error {
            message: "first".into(),
        });
        sender.send_delta(DebateEvent::Error {
            message: "dropped".into(),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.as_ref(),
            DebateEvent::Error { message } if message == "first"
        ));
        assert!(rx.try_recv().is_err());
    }
}

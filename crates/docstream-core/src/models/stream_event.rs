use serde::{Deserialize, Serialize};

use super::content::{ContentBlock, Message};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPayload {}

/// Fixed discriminator carried by every delta payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaKind {
    #[default]
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta,
}

/// A streaming update. Carries the full accumulated content so far, not the increment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPayload {
    #[serde(rename = "type", default)]
    pub kind: DeltaKind,
    #[serde(rename = "messageContent")]
    pub message_content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Events emitted by the relay for one session, in the order
/// `stream-start, stream-delta*, (stream-complete | stream-error)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum StreamEvent {
    #[serde(rename = "stream-start")]
    Start(StartPayload),
    #[serde(rename = "stream-delta")]
    Delta(DeltaPayload),
    #[serde(rename = "stream-complete")]
    Complete(Message),
    #[serde(rename = "stream-error")]
    Error(ErrorPayload),
}

impl StreamEvent {
    pub fn start() -> Self {
        StreamEvent::Start(StartPayload {})
    }

    pub fn delta(message_content: Vec<ContentBlock>) -> Self {
        StreamEvent::Delta(DeltaPayload {
            kind: DeltaKind::ContentBlockDelta,
            message_content,
        })
    }

    pub fn complete(message: Message) -> Self {
        StreamEvent::Complete(message)
    }

    pub fn error(error: impl Into<String>) -> Self {
        StreamEvent::Error(ErrorPayload {
            error: error.into(),
        })
    }

    /// Wire name of the event channel.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start(_) => "stream-start",
            StreamEvent::Delta(_) => "stream-delta",
            StreamEvent::Complete(_) => "stream-complete",
            StreamEvent::Error(_) => "stream-error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete(_) | StreamEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            serde_json::to_value(StreamEvent::start()).unwrap(),
            json!({"event": "stream-start", "payload": {}})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::delta(vec![ContentBlock::text("Hi")])).unwrap(),
            json!({
                "event": "stream-delta",
                "payload": {
                    "type": "content_block_delta",
                    "messageContent": [{"type": "text", "text": "Hi"}]
                }
            })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::complete(Message::assistant_text("Done"))).unwrap(),
            json!({
                "event": "stream-complete",
                "payload": {"role": "assistant", "content": [{"type": "text", "text": "Done"}]}
            })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::error("boom")).unwrap(),
            json!({"event": "stream-error", "payload": {"error": "boom"}})
        );
    }

    #[test]
    fn test_complete_payload_accepts_bare_string_content() {
        let event: StreamEvent = serde_json::from_value(json!({
            "event": "stream-complete",
            "payload": {"role": "assistant", "content": "plain"}
        }))
        .unwrap();
        assert_eq!(event, StreamEvent::complete(Message::assistant_text("plain")));
    }

    #[test]
    fn test_terminal_events() {
        assert!(!StreamEvent::start().is_terminal());
        assert!(!StreamEvent::delta(vec![]).is_terminal());
        assert!(StreamEvent::error("x").is_terminal());
        assert!(StreamEvent::complete(Message::assistant_text("y")).is_terminal());
    }
}

use serde_json::Value;
use thiserror::Error;

use crate::types::MessageEvent;

/// Frame type tags that all normalize to one [`MessageEvent`] shape.
pub const MESSAGE_EVENT_TYPES: [&str; 4] = [
    "conversation_message",
    "new_message",
    "message_create",
    "message_update",
];

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Message-bearing frame, normalized regardless of its variant tag.
    Message(MessageEvent),
    /// Typing indicator; the raw payload is forwarded untouched.
    Typing(Value),
    /// Read receipt; the raw payload is forwarded untouched.
    ReadReceipt(Value),
    /// Keep-alive frame; liveness only, never forwarded.
    Heartbeat,
    /// Server acknowledgement sent right after accepting the connection.
    ConnectionEstablished,
    /// Unrecognized frame type; logged by the dispatcher and dropped.
    Unknown {
        /// The unrecognized type tag.
        event_type: String,
    },
}

/// Errors produced while classifying an inbound frame.
///
/// These are logged and discarded by the transport; a malformed frame never
/// affects the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Parse(String),
    /// The frame has no string `type` field.
    #[error("frame is missing a string 'type' field")]
    MissingType,
}

/// Parse a raw text frame and classify it per the inbound event taxonomy.
pub fn parse_inbound(raw: &str) -> Result<InboundEvent, FrameError> {
    let frame: Value =
        serde_json::from_str(raw).map_err(|err| FrameError::Parse(err.to_string()))?;
    let event_type = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;

    Ok(match event_type {
        tag if MESSAGE_EVENT_TYPES.contains(&tag) => {
            InboundEvent::Message(normalize_message(&frame))
        }
        "typing_indicator" => InboundEvent::Typing(frame.clone()),
        "read_receipt" => InboundEvent::ReadReceipt(frame.clone()),
        "heartbeat" => InboundEvent::Heartbeat,
        "connection_established" => InboundEvent::ConnectionEstablished,
        other => InboundEvent::Unknown {
            event_type: other.to_owned(),
        },
    })
}

/// Normalize a message-bearing frame to the single [`MessageEvent`] shape.
///
/// Fields are read from the frame root first; the server wraps some variants
/// in a nested `message` object, so missing fields fall back into it. Both
/// framings normalize identically.
fn normalize_message(frame: &Value) -> MessageEvent {
    MessageEvent {
        id: field_string(frame, "id"),
        content: field_string(frame, "content"),
        sender: field_value(frame, "sender"),
        timestamp: field_string(frame, "timestamp"),
        status: field_string(frame, "status"),
        conversation: field_string(frame, "conversation"),
    }
}

fn field_value(frame: &Value, key: &str) -> Option<Value> {
    frame
        .get(key)
        .or_else(|| frame.get("message").and_then(|nested| nested.get(key)))
        .cloned()
}

fn field_string(frame: &Value, key: &str) -> Option<String> {
    field_value(frame, key).and_then(|value| match value {
        Value::String(text) => Some(text),
        _ => None,
    })
}

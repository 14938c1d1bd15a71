use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection lifecycle state reported to the consumer.
///
/// Owned exclusively by the manager; the transport only reports raw socket
/// lifecycle signals and never mutates this enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection and no connection attempt in flight.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The conversation socket is open and the join announcement was sent.
    Connected,
}

/// Identity of one connection attempt.
///
/// Immutable for the lifetime of the attempt; changing any field requires
/// tearing the transport down and opening a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionIdentity {
    /// Conversation the socket is scoped to.
    pub conversation_id: String,
    /// User id announced in the join frame.
    pub user_id: String,
    /// Bearer token carried in the connection URI.
    pub auth_token: String,
}

/// Outbound wire frame constructed by the consumer.
///
/// The core does not validate the shape beyond serializability; `extra`
/// carries intent-specific top-level fields (for example `message_id` on a
/// `mark_read` frame).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEvent {
    /// Frame type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Additional top-level fields, flattened into the frame.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl OutboundEvent {
    /// Construct a frame with a type tag and optional payload.
    pub fn new(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            extra: serde_json::Map::new(),
        }
    }

    /// The join announcement, mandatory first frame after a successful open.
    pub fn join(conversation_id: &str, user_id: &str) -> Self {
        Self::new(
            "join",
            Some(serde_json::json!({
                "conversation_id": conversation_id,
                "user_id": user_id,
            })),
        )
    }

    /// Keep-alive frame sent on the heartbeat interval.
    pub fn heartbeat() -> Self {
        Self::new("heartbeat", None)
    }

    /// Read-receipt intent; the server consumes `message_id` at the top level.
    pub fn mark_read(message_id: &str) -> Self {
        let mut event = Self::new("mark_read", None);
        event
            .extra
            .insert("message_id".to_owned(), Value::String(message_id.to_owned()));
        event
    }
}

/// Normalized shape produced for all message-bearing inbound frame variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MessageEvent {
    /// Message id.
    pub id: Option<String>,
    /// Message body.
    pub content: Option<String>,
    /// Sender descriptor, kept opaque (producers disagree on its shape).
    pub sender: Option<Value>,
    /// Event timestamp as supplied by the server.
    pub timestamp: Option<String>,
    /// Delivery status, for example `sent`.
    pub status: Option<String>,
    /// Conversation the message belongs to.
    pub conversation: Option<String>,
}

/// Command channel input accepted by the channel manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChannelCommand {
    /// Open the channel for a conversation.
    Activate {
        /// Target conversation id.
        conversation_id: String,
    },
    /// Tear the channel down; safe to issue repeatedly.
    Deactivate,
    /// Send an outbound frame; at-most-once, no queueing.
    Send {
        /// Frame to transmit.
        event: OutboundEvent,
    },
    /// Resend a previously failed frame; same transmission contract as `Send`.
    RetrySend {
        /// Frame to transmit.
        event: OutboundEvent,
    },
    /// Network reachability transition from the connectivity collaborator.
    NetworkChanged {
        /// Whether the network is currently reachable.
        available: bool,
    },
}

/// Event channel output emitted to consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChannelEvent {
    /// Connection lifecycle transition.
    StateChanged {
        /// New connection state.
        state: ConnectionState,
    },
    /// Normalized message delivered by the conversation stream.
    Message(MessageEvent),
    /// Raw typing-indicator payload.
    Typing(Value),
    /// Raw read-receipt payload.
    ReadReceipt(Value),
    /// Non-fatal local error, also readable via `last_error`.
    Error(crate::error::ChannelError),
}

//! Core channel contract shared between the transport layer and consumers.
//!
//! This crate defines the command/event protocol, connection-state machine,
//! retry budget, inbound-frame normalization, and common error/channel
//! abstractions.

/// Async command/event channel primitives.
pub mod channel;
/// Stable channel error types and close-code classification.
pub mod error;
/// Inbound-frame classification and message normalization.
pub mod normalization;
/// Bounded reconnection budget.
pub mod retry;
/// Connection lifecycle state machine.
pub mod state_machine;
/// Consumer-facing protocol types (commands, events, payloads).
pub mod types;

pub use channel::{ChannelBus, ChannelBusError, EventStream};
pub use error::{ChannelError, ChannelErrorCategory, classify_close_code};
pub use normalization::{FrameError, InboundEvent, MESSAGE_EVENT_TYPES, parse_inbound};
pub use retry::RetryBudget;
pub use state_machine::ConnectionStateMachine;
pub use types::{
    ChannelCommand, ChannelEvent, ConnectionIdentity, ConnectionState, MessageEvent,
    OutboundEvent,
};

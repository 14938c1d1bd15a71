use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for consumer-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelErrorCategory {
    /// Invalid input, missing configuration, or unsupported state.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Wire-protocol violation reported by the server.
    Protocol,
    /// Internal invariant break.
    Internal,
}

/// Stable error payload crossing the consumer boundary.
///
/// Nothing in the channel core panics or throws toward the consumer; all
/// failure is communicated through this readable payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChannelError {
    /// High-level error category.
    pub category: ChannelErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChannelError {
    /// Construct a new channel error.
    pub fn new(
        category: ChannelErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Send or retry was invoked while the channel is not connected.
    pub fn not_connected() -> Self {
        Self::new(
            ChannelErrorCategory::Network,
            "not_connected",
            "message could not be sent: not connected",
        )
    }

    /// Activation was attempted without an auth token.
    pub fn missing_auth_token() -> Self {
        Self::new(
            ChannelErrorCategory::Auth,
            "missing_auth_token",
            "no authentication token available; activation refused",
        )
    }

    /// Activation was attempted without a user id.
    pub fn missing_user_id() -> Self {
        Self::new(
            ChannelErrorCategory::Auth,
            "missing_user_id",
            "no user id available; activation refused",
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChannelErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while channel is in state {current:?}"),
        )
    }
}

/// Map a WebSocket close code to an error category.
///
/// Application codes come from the conversation server: 4003 (anonymous
/// user) and 4004 (not a conversation participant) are auth rejections,
/// other 4xxx codes are server-side consumer failures.
pub fn classify_close_code(code: u16) -> ChannelErrorCategory {
    match code {
        4003 | 4004 => ChannelErrorCategory::Auth,
        4000..=4999 => ChannelErrorCategory::Protocol,
        _ => ChannelErrorCategory::Network,
    }
}

//! Conversation channel transport and lifecycle manager.
//!
//! [`transport`] owns one physical WebSocket per conversation; [`manager`]
//! owns the channel lifecycle around it: activation, heartbeats, bounded
//! reconnection, and the consumer-facing state/error surface.

pub mod manager;
pub mod transport;

pub use manager::{DEFAULT_HEARTBEAT_INTERVAL, ManagerConfig, ManagerHandle, spawn_manager};
pub use transport::{TransportHandle, TransportSignal};

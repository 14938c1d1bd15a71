use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ChannelCommand, ChannelEvent};

/// Receiver half of the event broadcast, one per subscriber.
pub type EventStream = broadcast::Receiver<ChannelEvent>;

/// Failure surfaced when a command cannot reach the manager runtime.
#[derive(Debug, Error)]
pub enum ChannelBusError {
    /// The runtime is gone; its command receiver was dropped.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command lane into the manager runtime paired with the event broadcast
/// coming back out.
///
/// Cloning is cheap; every consumer handle shares the same underlying pair.
#[derive(Clone, Debug)]
pub struct ChannelBus {
    command_tx: mpsc::Sender<ChannelCommand>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl ChannelBus {
    /// Build the pair; the caller hands the returned receiver to the
    /// runtime. Buffers are clamped to at least one slot.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ChannelCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Sender side of the event broadcast, for tasks that emit without
    /// holding the whole bus.
    pub fn event_sender(&self) -> broadcast::Sender<ChannelEvent> {
        self.event_tx.clone()
    }

    /// Open a fresh event subscription.
    ///
    /// Only events emitted after this call are observed.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Queue one command for the manager runtime.
    pub async fn send_command(&self, command: ChannelCommand) -> Result<(), ChannelBusError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChannelBusError::CommandChannelClosed)
    }

    /// Fan an event out to every live subscriber.
    ///
    /// Best-effort: with no subscribers the event is dropped, and a lagging
    /// subscriber loses the oldest entries rather than stalling emission.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }
}

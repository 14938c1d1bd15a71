use crate::{error::ChannelError, types::ConnectionState};

/// Connection-state machine owned by the channel manager.
///
/// Transitions only run along
/// `disconnected -> connecting -> connected -> disconnected`; a drop always
/// passes through `disconnected` before a new attempt, so
/// `connected -> connecting` is rejected. All mutation happens through the
/// explicit transition methods below, keeping the lifecycle auditable.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }
}

impl ConnectionStateMachine {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A connection attempt is starting.
    pub fn on_activate(&mut self) -> Result<ConnectionState, ChannelError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ChannelError::invalid_state(self.state, "activate"));
        }
        self.state = ConnectionState::Connecting;
        Ok(self.state)
    }

    /// The transport reported a successful open.
    pub fn on_transport_open(&mut self) -> Result<ConnectionState, ChannelError> {
        if self.state != ConnectionState::Connecting {
            return Err(ChannelError::invalid_state(self.state, "transport_open"));
        }
        self.state = ConnectionState::Connected;
        Ok(self.state)
    }

    /// The transport closed or the channel was deactivated.
    ///
    /// Valid from any state, so deactivation stays idempotent.
    pub fn on_disconnect(&mut self) -> ConnectionState {
        self.state = ConnectionState::Disconnected;
        self.state
    }
}

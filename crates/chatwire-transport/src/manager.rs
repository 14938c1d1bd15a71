//! Channel manager runtime.
//!
//! Owns the one-connection-at-a-time lifecycle for a conversation channel:
//! activation, heartbeats, bounded reconnection, and the consumer-facing
//! state and error bookkeeping. Consumers talk to the runtime through a
//! [`ManagerHandle`]; nothing on that surface panics or returns transport
//! errors directly.

use std::time::Duration;

use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, trace, warn};
use url::Url;

use chatwire_core::{
    ChannelBus, ChannelBusError, ChannelCommand, ChannelError, ChannelErrorCategory,
    ChannelEvent, ConnectionIdentity, ConnectionState, ConnectionStateMachine, EventStream,
    OutboundEvent, RetryBudget, classify_close_code,
};
use chatwire_platform::{CredentialError, CredentialProvider};

use crate::transport::{self, TransportHandle, TransportSignal};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;
const SIGNAL_BUFFER: usize = 16;

/// Default keep-alive cadence while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime configuration for one channel manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base server URL; the conversation path and token query are appended
    /// per connection attempt.
    pub endpoint: Url,
    /// Keep-alive cadence while connected.
    pub heartbeat_interval: Duration,
    /// Reconnection budget applied after unexpected closes.
    pub retry: RetryBudget,
}

impl ManagerConfig {
    /// Configuration for `endpoint` with default heartbeat and retry policy.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            retry: RetryBudget::default(),
        }
    }
}

/// Cloneable consumer handle to a running channel manager.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    bus: ChannelBus,
    state_rx: watch::Receiver<ConnectionState>,
    error_rx: watch::Receiver<Option<ChannelError>>,
}

impl ManagerHandle {
    /// Open the channel for `conversation_id`.
    ///
    /// Credential problems and connection failures surface as
    /// [`ChannelEvent::Error`] and through [`ManagerHandle::last_error`],
    /// never as an `Err` here.
    pub async fn activate(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<(), ChannelBusError> {
        self.bus
            .send_command(ChannelCommand::Activate {
                conversation_id: conversation_id.into(),
            })
            .await
    }

    /// Tear the channel down; safe to call repeatedly.
    pub async fn deactivate(&self) -> Result<(), ChannelBusError> {
        self.bus.send_command(ChannelCommand::Deactivate).await
    }

    /// Transmit one frame at most once; no queueing while disconnected.
    pub async fn send_message(&self, event: OutboundEvent) -> Result<(), ChannelBusError> {
        self.bus.send_command(ChannelCommand::Send { event }).await
    }

    /// Resend a previously failed frame; same contract as `send_message`.
    pub async fn retry_send(&self, event: OutboundEvent) -> Result<(), ChannelBusError> {
        self.bus
            .send_command(ChannelCommand::RetrySend { event })
            .await
    }

    /// Report a network reachability transition.
    pub async fn notify_network(&self, available: bool) -> Result<(), ChannelBusError> {
        self.bus
            .send_command(ChannelCommand::NetworkChanged { available })
            .await
    }

    /// Subscribe to channel events.
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Most recent recorded error, cleared by the next successful send.
    pub fn last_error(&self) -> Option<ChannelError> {
        self.error_rx.borrow().clone()
    }

    /// Watch receiver over connection-state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// Spawn the manager runtime on the current tokio runtime.
pub fn spawn_manager(
    config: ManagerConfig,
    provider: impl CredentialProvider + 'static,
) -> ManagerHandle {
    let (bus, command_rx) = ChannelBus::new(COMMAND_BUFFER, EVENT_BUFFER);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (error_tx, error_rx) = watch::channel(None);

    let budget = config.retry;
    let manager = ChannelManager {
        config,
        provider,
        bus: bus.clone(),
        command_rx,
        state_machine: ConnectionStateMachine::default(),
        budget,
        transport: None,
        signal_rx: None,
        identity: None,
        reconnect_at: None,
        state_tx,
        error_tx,
    };
    tokio::spawn(manager.run());

    ManagerHandle {
        bus,
        state_rx,
        error_rx,
    }
}

enum Wake {
    Command(Option<ChannelCommand>),
    Signal(Option<TransportSignal>),
    Heartbeat,
    ReconnectDue,
}

struct ChannelManager<P> {
    config: ManagerConfig,
    provider: P,
    bus: ChannelBus,
    command_rx: mpsc::Receiver<ChannelCommand>,
    state_machine: ConnectionStateMachine,
    budget: RetryBudget,
    transport: Option<TransportHandle>,
    signal_rx: Option<mpsc::Receiver<TransportSignal>>,
    identity: Option<ConnectionIdentity>,
    reconnect_at: Option<(Instant, String)>,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<ChannelError>>,
}

impl<P: CredentialProvider> ChannelManager<P> {
    async fn run(mut self) {
        let period = self.config.heartbeat_interval;
        // First tick lands one full period after start, not immediately.
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let wake = {
                let signal = async {
                    match self.signal_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                let reconnect_due = async {
                    match &self.reconnect_at {
                        Some((at, _)) => tokio::time::sleep_until(*at).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    command = self.command_rx.recv() => Wake::Command(command),
                    signal = signal => Wake::Signal(signal),
                    _ = heartbeat.tick() => Wake::Heartbeat,
                    _ = reconnect_due => Wake::ReconnectDue,
                }
            };

            match wake {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => break,
                Wake::Signal(Some(signal)) => self.handle_signal(signal).await,
                Wake::Signal(None) => self.signal_rx = None,
                Wake::Heartbeat => self.emit_heartbeat(),
                Wake::ReconnectDue => self.handle_reconnect_due().await,
            }
        }

        debug!("all consumer handles dropped, shutting channel manager down");
        self.close_transport().await;
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Activate { conversation_id } => self.activate(conversation_id).await,
            ChannelCommand::Deactivate => self.deactivate().await,
            ChannelCommand::Send { event } => self.transmit(event, false),
            ChannelCommand::RetrySend { event } => self.transmit(event, true),
            ChannelCommand::NetworkChanged { available } => {
                self.handle_network_change(available).await
            }
        }
    }

    /// Open the channel for `conversation_id`, replacing any live connection.
    async fn activate(&mut self, conversation_id: String) {
        self.reconnect_at = None;
        if self.transport.is_some() {
            debug!(%conversation_id, "activation replaces an existing connection");
            self.close_transport().await;
            let state = self.state_machine.on_disconnect();
            self.publish_state(state);
        }

        let auth_token = match self.provider.auth_token() {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "activation refused: auth token unavailable");
                self.record_error(map_credential_error("auth_token", err));
                return;
            }
        };
        let user_id = match self.provider.user_id() {
            Ok(user_id) => user_id,
            Err(err) => {
                warn!(error = %err, "activation refused: user id unavailable");
                self.record_error(map_credential_error("user_id", err));
                return;
            }
        };

        let identity = ConnectionIdentity {
            conversation_id,
            user_id,
            auth_token,
        };
        self.identity = Some(identity.clone());

        match self.state_machine.on_activate() {
            Ok(state) => self.publish_state(state),
            Err(err) => {
                self.record_error(err);
                return;
            }
        }
        self.connect(identity).await;
    }

    /// One connection attempt for a settled identity.
    async fn connect(&mut self, identity: ConnectionIdentity) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        match transport::open(
            &self.config.endpoint,
            &identity,
            self.bus.event_sender(),
            signal_tx,
        )
        .await
        {
            Ok(handle) => {
                info!(conversation_id = %identity.conversation_id, "channel connected");
                self.transport = Some(handle);
                self.signal_rx = Some(signal_rx);
                self.budget.reset();
                match self.state_machine.on_transport_open() {
                    Ok(state) => self.publish_state(state),
                    Err(err) => warn!(error = %err, "open signal in unexpected state"),
                }
            }
            Err(err) => {
                warn!(
                    conversation_id = %identity.conversation_id,
                    error = %err,
                    "connection attempt failed"
                );
                self.record_error(err);
                let state = self.state_machine.on_disconnect();
                self.publish_state(state);
                self.schedule_reconnect();
            }
        }
    }

    /// Tear everything down. Idempotent, including the reconnect timer.
    async fn deactivate(&mut self) {
        self.reconnect_at = None;
        self.identity = None;
        self.close_transport().await;
        let state = self.state_machine.on_disconnect();
        self.publish_state(state);
    }

    async fn close_transport(&mut self) {
        self.signal_rx = None;
        if let Some(handle) = self.transport.take() {
            handle.close().await;
        }
    }

    async fn handle_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Error { message } => {
                warn!(%message, "transport error");
                self.record_error(ChannelError::new(
                    ChannelErrorCategory::Network,
                    "transport_error",
                    message,
                ));
            }
            TransportSignal::Closed { code } => self.handle_unexpected_close(code).await,
        }
    }

    /// The server or network dropped the connection out from under us.
    async fn handle_unexpected_close(&mut self, code: Option<u16>) {
        warn!(?code, "connection closed unexpectedly");
        self.close_transport().await;
        let state = self.state_machine.on_disconnect();
        self.publish_state(state);

        if let Some(code) = code
            && code >= 4000
        {
            self.record_error(ChannelError::new(
                classify_close_code(code),
                "connection_rejected",
                format!("server closed the connection with code {code}"),
            ));
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let Some(identity) = self.identity.as_ref() else {
            return;
        };
        let conversation_id = identity.conversation_id.clone();

        match self.budget.next_delay() {
            Some(delay) => {
                debug!(
                    %conversation_id,
                    attempt = self.budget.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                self.reconnect_at = Some((Instant::now() + delay, conversation_id));
            }
            None => {
                warn!(
                    %conversation_id,
                    max = self.budget.max(),
                    "retry budget exhausted, waiting for an external trigger"
                );
                self.record_error(ChannelError::new(
                    ChannelErrorCategory::Network,
                    "retry_budget_exhausted",
                    format!("gave up reconnecting after {} attempts", self.budget.max()),
                ));
            }
        }
    }

    async fn handle_reconnect_due(&mut self) {
        let Some((_, conversation_id)) = self.reconnect_at.take() else {
            return;
        };
        let Some(identity) = self.identity.clone() else {
            return;
        };
        if identity.conversation_id != conversation_id {
            debug!(
                scheduled = %conversation_id,
                current = %identity.conversation_id,
                "stale reconnect timer ignored"
            );
            return;
        }
        if self.transport.is_some()
            || self.state_machine.state() != ConnectionState::Disconnected
        {
            return;
        }

        info!(%conversation_id, attempt = self.budget.attempts(), "reconnecting");
        // Re-runs the full activation so rotated credentials are picked up.
        self.activate(conversation_id).await;
    }

    /// Network reachability flipped. A fresh network always grants a fresh
    /// retry budget, even when the previous one was exhausted.
    async fn handle_network_change(&mut self, available: bool) {
        if !available {
            debug!("network reported unavailable");
            return;
        }
        let Some(identity) = self.identity.clone() else {
            return;
        };
        if self.transport.is_some()
            || self.state_machine.state() != ConnectionState::Disconnected
        {
            return;
        }

        info!(
            conversation_id = %identity.conversation_id,
            "network available again, reactivating channel"
        );
        self.reconnect_at = None;
        self.budget.reset();
        self.activate(identity.conversation_id).await;
    }

    /// Transmit one frame at most once; record `not_connected` otherwise.
    fn transmit(&mut self, event: OutboundEvent, is_retry: bool) {
        if self.state_machine.state() != ConnectionState::Connected || self.transport.is_none() {
            debug!(
                event_type = %event.event_type,
                is_retry,
                "send refused: channel is not connected"
            );
            self.record_error(ChannelError::not_connected());
            return;
        }

        self.clear_error();
        let result = self
            .transport
            .as_ref()
            .map(|handle| handle.send(event));
        if let Some(Err(err)) = result {
            self.record_error(err);
        }
    }

    /// Keep-alive tick. Skipped silently whenever the channel is not open.
    fn emit_heartbeat(&self) {
        if self.state_machine.state() != ConnectionState::Connected {
            return;
        }
        let Some(handle) = &self.transport else {
            return;
        };
        match handle.send(OutboundEvent::heartbeat()) {
            Ok(()) => trace!("heartbeat sent"),
            Err(err) => debug!(error = %err, "heartbeat skipped"),
        }
    }

    fn publish_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        let _ = self.state_tx.send(state);
        self.bus.emit(ChannelEvent::StateChanged { state });
        debug!(?state, "connection state changed");
    }

    fn record_error(&self, error: ChannelError) {
        let _ = self.error_tx.send(Some(error.clone()));
        self.bus.emit(ChannelEvent::Error(error));
    }

    fn clear_error(&self) {
        if self.error_tx.borrow().is_some() {
            let _ = self.error_tx.send(None);
        }
    }
}

fn map_credential_error(field: &str, err: CredentialError) -> ChannelError {
    match err {
        CredentialError::Missing(_) => match field {
            "auth_token" => ChannelError::missing_auth_token(),
            _ => ChannelError::missing_user_id(),
        },
        CredentialError::Unavailable(message) => ChannelError::new(
            ChannelErrorCategory::Config,
            "credentials_unavailable",
            format!("credential source unavailable while reading {field}: {message}"),
        ),
    }
}

//! One physical WebSocket connection, scoped to a single conversation.
//!
//! The transport owns the socket task and nothing else: it announces the
//! join, pumps frames in both directions, and reports raw lifecycle signals
//! upward. Reconnection policy, state, and error bookkeeping live in the
//! manager.

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use chatwire_core::{
    ChannelError, ChannelErrorCategory, ChannelEvent, ConnectionIdentity, InboundEvent,
    OutboundEvent, parse_inbound,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_BUFFER: usize = 64;

/// Raw socket lifecycle signal reported to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The socket reported an error; the connection may still be usable.
    Error {
        /// Underlying transport error text.
        message: String,
    },
    /// The socket closed without [`TransportHandle::close`] being called.
    Closed {
        /// Server-supplied close code, when one was delivered.
        code: Option<u16>,
    },
}

/// Handle to one live conversation socket.
#[derive(Debug)]
pub struct TransportHandle {
    outbound_tx: mpsc::Sender<OutboundEvent>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl TransportHandle {
    /// Queue one frame for transmission on the live socket.
    pub fn send(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        self.outbound_tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ChannelError::new(
                ChannelErrorCategory::Network,
                "send_buffer_full",
                "outbound buffer is full",
            ),
            mpsc::error::TrySendError::Closed(_) => ChannelError::not_connected(),
        })
    }

    /// Close the socket with a normal closure and wait for the task to end.
    ///
    /// After this resolves no further signal or event is produced by the
    /// connection, so the caller never observes a stale close.
    pub async fn close(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Open one physical connection for `identity` and announce the join.
///
/// The join announcement is the first frame on the wire; a successful return
/// means the socket is open and the join was flushed. Inbound frames are
/// classified and forwarded to `events`; lifecycle signals flow to `signals`.
/// The transport never reconnects on its own.
pub async fn open(
    base: &Url,
    identity: &ConnectionIdentity,
    events: broadcast::Sender<ChannelEvent>,
    signals: mpsc::Sender<TransportSignal>,
) -> Result<TransportHandle, ChannelError> {
    let endpoint = conversation_endpoint(base, identity);
    let (stream, _response) = connect_async(endpoint.as_str()).await.map_err(|err| {
        ChannelError::new(ChannelErrorCategory::Network, "connect_failed", err.to_string())
    })?;
    let (mut write, read) = stream.split();

    let join = OutboundEvent::join(&identity.conversation_id, &identity.user_id);
    let frame = serde_json::to_string(&join).map_err(|err| {
        ChannelError::new(ChannelErrorCategory::Internal, "serialize_error", err.to_string())
    })?;
    write.send(Message::text(frame)).await.map_err(|err| {
        ChannelError::new(ChannelErrorCategory::Network, "join_failed", err.to_string())
    })?;
    debug!(conversation_id = %identity.conversation_id, "socket open, join announced");

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let stop = CancellationToken::new();
    let task = tokio::spawn(run_connection(
        write,
        read,
        outbound_rx,
        events,
        signals,
        stop.child_token(),
    ));

    Ok(TransportHandle {
        outbound_tx,
        stop,
        task,
    })
}

/// Build the conversation-scoped endpoint with the bearer token in the URI.
fn conversation_endpoint(base: &Url, identity: &ConnectionIdentity) -> Url {
    let mut endpoint = base.clone();
    let path = format!(
        "{}/ws/messaging/{}/",
        base.path().trim_end_matches('/'),
        identity.conversation_id
    );
    endpoint.set_path(&path);
    endpoint.set_query(None);
    endpoint
        .query_pairs_mut()
        .append_pair("token", &identity.auth_token);
    endpoint
}

async fn run_connection(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    mut outbound_rx: mpsc::Receiver<OutboundEvent>,
    events: broadcast::Sender<ChannelEvent>,
    signals: mpsc::Sender<TransportSignal>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "channel deactivated".into(),
                };
                if let Err(err) = write.send(Message::Close(Some(close))).await {
                    trace!(error = %err, "close frame not delivered");
                }
                break;
            }
            outbound = outbound_rx.recv() => {
                let Some(event) = outbound else { break };
                match serde_json::to_string(&event) {
                    Ok(frame) => {
                        if let Err(err) = write.send(Message::text(frame)).await {
                            let _ = signals
                                .send(TransportSignal::Error { message: err.to_string() })
                                .await;
                        }
                    }
                    Err(err) => warn!(
                        error = %err,
                        event_type = %event.event_type,
                        "dropping unserializable outbound event"
                    ),
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => dispatch_frame(text.as_str(), &events),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(err) = write.send(Message::Pong(payload)).await {
                        trace!(error = %err, "pong not delivered");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|frame| u16::from(frame.code));
                    debug!(?code, "server closed the socket");
                    let _ = signals.send(TransportSignal::Closed { code }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = signals
                        .send(TransportSignal::Error { message: err.to_string() })
                        .await;
                    let _ = signals.send(TransportSignal::Closed { code: None }).await;
                    break;
                }
                None => {
                    let _ = signals.send(TransportSignal::Closed { code: None }).await;
                    break;
                }
            },
        }
    }
}

/// Classify one text frame and forward it to subscribers.
///
/// Malformed frames and unknown types are logged and dropped; nothing here
/// affects the connection.
fn dispatch_frame(raw: &str, events: &broadcast::Sender<ChannelEvent>) {
    match parse_inbound(raw) {
        Ok(InboundEvent::Message(message)) => {
            let _ = events.send(ChannelEvent::Message(message));
        }
        Ok(InboundEvent::Typing(payload)) => {
            let _ = events.send(ChannelEvent::Typing(payload));
        }
        Ok(InboundEvent::ReadReceipt(payload)) => {
            let _ = events.send(ChannelEvent::ReadReceipt(payload));
        }
        Ok(InboundEvent::Heartbeat) => trace!("heartbeat frame received"),
        Ok(InboundEvent::ConnectionEstablished) => debug!("server acknowledged the connection"),
        Ok(InboundEvent::Unknown { event_type }) => {
            debug!(%event_type, "dropping frame with unrecognized type");
        }
        Err(err) => warn!(error = %err, "dropping malformed inbound frame"),
    }
}

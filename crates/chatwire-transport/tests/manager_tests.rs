//! End-to-end manager tests against a local WebSocket server.

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use url::Url;

use chatwire_core::{
    ChannelEvent, ConnectionState, EventStream, OutboundEvent, RetryBudget,
};
use chatwire_platform::InMemoryCredentials;
use chatwire_transport::{ManagerConfig, ManagerHandle, spawn_manager};

/// Minimal conversation server: accepts one client at a time, records every
/// text frame, and pushes or severs on demand.
struct TestServer {
    addr: SocketAddr,
    inbound_rx: mpsc::Receiver<String>,
    push_tx: mpsc::Sender<String>,
    sever_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("test server should bind");
        Self::with_listener(listener)
    }

    /// Rebind to a previously used address, retrying while the old socket
    /// is released.
    async fn start_at(addr: SocketAddr) -> Self {
        for _ in 0..50 {
            if let Ok(listener) = TcpListener::bind(addr).await {
                return Self::with_listener(listener);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("could not rebind test server to {addr}");
    }

    fn with_listener(listener: TcpListener) -> Self {
        let addr = listener.local_addr().expect("listener address");
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (push_tx, push_rx) = mpsc::channel(16);
        let (sever_tx, sever_rx) = mpsc::channel(4);
        let task = tokio::spawn(run_server(listener, inbound_tx, push_rx, sever_rx));
        Self {
            addr,
            inbound_rx,
            push_tx,
            sever_tx,
            task,
        }
    }

    fn endpoint(&self) -> Url {
        Url::parse(&format!("ws://{}", self.addr)).expect("endpoint url")
    }

    async fn recv_frame(&mut self) -> Value {
        let raw = timeout(Duration::from_secs(2), self.inbound_rx.recv())
            .await
            .expect("server should receive a frame in time")
            .expect("server channel should stay open");
        serde_json::from_str(&raw).expect("client frames should be JSON")
    }

    async fn push(&self, frame: Value) {
        self.push_tx
            .send(frame.to_string())
            .await
            .expect("push to test server");
    }

    /// Drop the current connection without a close handshake.
    async fn sever(&self) {
        self.sever_tx.send(()).await.expect("sever request");
    }

    /// Stop listening entirely, releasing the address.
    fn shut_down(&self) {
        self.task.abort();
    }
}

async fn run_server(
    listener: TcpListener,
    inbound_tx: mpsc::Sender<String>,
    mut push_rx: mpsc::Receiver<String>,
    mut sever_rx: mpsc::Receiver<()>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            continue;
        };
        loop {
            tokio::select! {
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let _ = inbound_tx.send(text.to_string()).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                frame = push_rx.recv() => match frame {
                    Some(frame) => {
                        if ws.send(Message::text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => return,
                },
                sever = sever_rx.recv() => match sever {
                    Some(()) => break,
                    None => return,
                },
            }
        }
    }
}

fn manager_for(server: &TestServer) -> ManagerHandle {
    spawn_manager(
        ManagerConfig::new(server.endpoint()),
        InMemoryCredentials::new("tok-1", "u1"),
    )
}

async fn next_event(events: &mut EventStream) -> ChannelEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event should arrive in time")
        .expect("event stream should stay open")
}

async fn wait_for_state(handle: &ManagerHandle, state: ConnectionState) {
    let mut watch = handle.state_watch();
    timeout(Duration::from_secs(2), watch.wait_for(|current| *current == state))
        .await
        .expect("state should settle in time")
        .expect("state watch should stay open");
}

#[tokio::test]
async fn join_announcement_is_the_first_outbound_frame() {
    let mut server = TestServer::start().await;
    let handle = manager_for(&server);

    handle.activate("c1").await.expect("activate");

    let frame = server.recv_frame().await;
    assert_eq!(
        frame,
        json!({
            "type": "join",
            "data": { "conversation_id": "c1", "user_id": "u1" },
        })
    );
}

#[tokio::test]
async fn activation_walks_connecting_then_connected() {
    let server = TestServer::start().await;
    let handle = manager_for(&server);
    let mut events = handle.subscribe();

    handle.activate("c1").await.expect("activate");

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::StateChanged {
            state: ConnectionState::Connecting
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::StateChanged {
            state: ConnectionState::Connected
        }
    );
    assert_eq!(handle.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn message_variants_normalize_to_one_event_shape() {
    let mut server = TestServer::start().await;
    let handle = manager_for(&server);

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    let mut events = handle.subscribe();
    server
        .push(json!({
            "type": "message_update",
            "id": "m1",
            "content": "hi",
            "sender": { "id": "u2" },
            "timestamp": "2026-08-01T10:00:00Z",
            "status": "sent",
            "conversation": "c1",
        }))
        .await;
    server
        .push(json!({
            "type": "new_message",
            "message": {
                "id": "m1",
                "content": "hi",
                "sender": { "id": "u2" },
                "timestamp": "2026-08-01T10:00:00Z",
                "status": "sent",
                "conversation": "c1",
            },
        }))
        .await;

    let first = match next_event(&mut events).await {
        ChannelEvent::Message(message) => message,
        other => panic!("expected a message event, got {other:?}"),
    };
    let second = match next_event(&mut events).await {
        ChannelEvent::Message(message) => message,
        other => panic!("expected a message event, got {other:?}"),
    };
    assert_eq!(first, second);
    assert_eq!(first.id.as_deref(), Some("m1"));
    assert_eq!(first.content.as_deref(), Some("hi"));
}

#[tokio::test]
async fn unknown_frame_types_are_dropped() {
    let mut server = TestServer::start().await;
    let handle = manager_for(&server);

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    let mut events = handle.subscribe();
    server
        .push(json!({ "type": "presence_update", "data": {} }))
        .await;
    server
        .push(json!({ "type": "typing_indicator", "data": { "user_id": "u2" } }))
        .await;

    // The unknown frame produces nothing; the next event is the typing one.
    match next_event(&mut events).await {
        ChannelEvent::Typing(payload) => assert_eq!(payload["data"]["user_id"], "u2"),
        other => panic!("expected the typing event, got {other:?}"),
    }
}

#[tokio::test]
async fn typing_and_read_receipts_forward_raw_payloads() {
    let mut server = TestServer::start().await;
    let handle = manager_for(&server);

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    let mut events = handle.subscribe();
    server
        .push(json!({ "type": "read_receipt", "user_id": "u2", "message_id": "m1" }))
        .await;

    match next_event(&mut events).await {
        ChannelEvent::ReadReceipt(payload) => {
            assert_eq!(payload["message_id"], "m1");
            assert_eq!(payload["user_id"], "u2");
        }
        other => panic!("expected the read receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn send_reaches_the_server_and_clears_last_error() {
    let mut server = TestServer::start().await;
    let handle = manager_for(&server);

    // Record an error first so the successful send visibly clears it.
    handle
        .send_message(OutboundEvent::mark_read("m0"))
        .await
        .expect("send command");

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    handle
        .send_message(OutboundEvent::mark_read("m1"))
        .await
        .expect("send command");

    let frame = server.recv_frame().await;
    assert_eq!(frame, json!({ "type": "mark_read", "message_id": "m1" }));
    assert_eq!(handle.last_error(), None);
}

#[tokio::test]
async fn send_while_disconnected_records_a_local_error() {
    let server = TestServer::start().await;
    let handle = manager_for(&server);
    let mut events = handle.subscribe();

    handle
        .send_message(OutboundEvent::new("message", Some(json!({ "content": "hi" }))))
        .await
        .expect("send command");

    match next_event(&mut events).await {
        ChannelEvent::Error(err) => assert_eq!(err.code, "not_connected"),
        other => panic!("expected a not_connected error, got {other:?}"),
    }
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        handle.last_error().map(|err| err.code),
        Some("not_connected".to_owned())
    );
}

#[tokio::test]
async fn retry_send_follows_the_same_transmission_contract() {
    let server = TestServer::start().await;
    let handle = manager_for(&server);
    let mut events = handle.subscribe();

    handle
        .retry_send(OutboundEvent::new("message", Some(json!({ "content": "hi" }))))
        .await
        .expect("retry command");

    match next_event(&mut events).await {
        ChannelEvent::Error(err) => assert_eq!(err.code, "not_connected"),
        other => panic!("expected a not_connected error, got {other:?}"),
    }
}

#[tokio::test]
async fn heartbeat_frames_flow_on_the_configured_interval() {
    let mut server = TestServer::start().await;
    let mut config = ManagerConfig::new(server.endpoint());
    config.heartbeat_interval = Duration::from_millis(100);
    let handle = spawn_manager(config, InMemoryCredentials::new("tok-1", "u1"));

    handle.activate("c1").await.expect("activate");
    server.recv_frame().await; // join

    let first = server.recv_frame().await;
    assert_eq!(first, json!({ "type": "heartbeat" }));
    let second = server.recv_frame().await;
    assert_eq!(second, json!({ "type": "heartbeat" }));
}

#[tokio::test]
async fn reconnects_with_a_fresh_join_after_an_unexpected_close() {
    let mut server = TestServer::start().await;
    let mut config = ManagerConfig::new(server.endpoint());
    config.retry = RetryBudget::new(5, Duration::from_millis(100));
    let handle = spawn_manager(config, InMemoryCredentials::new("tok-1", "u1"));

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    server.sever().await;
    wait_for_state(&handle, ConnectionState::Disconnected).await;

    // The scheduled retry opens a new connection and re-announces the join.
    let frame = server.recv_frame().await;
    assert_eq!(frame["type"], "join");
    wait_for_state(&handle, ConnectionState::Connected).await;
}

#[tokio::test]
async fn network_trigger_resets_an_exhausted_retry_budget() {
    let mut server = TestServer::start().await;
    let addr = server.addr;
    let mut config = ManagerConfig::new(server.endpoint());
    config.retry = RetryBudget::new(2, Duration::from_millis(50));
    let handle = spawn_manager(config, InMemoryCredentials::new("tok-1", "u1"));

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    let mut events = handle.subscribe();
    server.shut_down();

    let mut exhausted = false;
    for _ in 0..32 {
        if let ChannelEvent::Error(err) = next_event(&mut events).await
            && err.code == "retry_budget_exhausted"
        {
            exhausted = true;
            break;
        }
    }
    assert!(exhausted, "retry budget should run out");
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);

    // The server comes back and connectivity is reported restored; the
    // budget is granted afresh even though it was spent.
    let mut server = TestServer::start_at(addr).await;
    handle.notify_network(true).await.expect("network notice");

    let frame = server.recv_frame().await;
    assert_eq!(frame["type"], "join");
    wait_for_state(&handle, ConnectionState::Connected).await;
}

#[tokio::test]
async fn deactivate_is_idempotent_and_cancels_reconnects() {
    let mut server = TestServer::start().await;
    let mut config = ManagerConfig::new(server.endpoint());
    config.retry = RetryBudget::new(5, Duration::from_millis(50));
    let handle = spawn_manager(config, InMemoryCredentials::new("tok-1", "u1"));

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    server.recv_frame().await; // join

    // Sever to schedule a retry, then deactivate before it fires.
    server.sever().await;
    wait_for_state(&handle, ConnectionState::Disconnected).await;
    handle.deactivate().await.expect("deactivate");
    handle.deactivate().await.expect("second deactivate");

    // No reconnect join may arrive after deactivation.
    let outcome = timeout(Duration::from_millis(400), server.inbound_rx.recv()).await;
    assert!(outcome.is_err(), "deactivation should cancel the retry timer");
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn activation_without_credentials_fails_before_connecting() {
    let mut server = TestServer::start().await;
    let handle = spawn_manager(
        ManagerConfig::new(server.endpoint()),
        InMemoryCredentials::default(),
    );
    let mut events = handle.subscribe();

    handle.activate("c1").await.expect("activate");

    match next_event(&mut events).await {
        ChannelEvent::Error(err) => assert_eq!(err.code, "missing_auth_token"),
        other => panic!("expected a credential error, got {other:?}"),
    }
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);

    let outcome = timeout(Duration::from_millis(300), server.inbound_rx.recv()).await;
    assert!(outcome.is_err(), "no connection may be attempted");
}

#[tokio::test]
async fn reactivation_replaces_the_previous_conversation() {
    let mut server = TestServer::start().await;
    let handle = manager_for(&server);

    handle.activate("c1").await.expect("activate");
    wait_for_state(&handle, ConnectionState::Connected).await;
    let first = server.recv_frame().await;
    assert_eq!(first["data"]["conversation_id"], "c1");

    handle.activate("c2").await.expect("activate again");
    let second = server.recv_frame().await;
    assert_eq!(second["data"]["conversation_id"], "c2");
    wait_for_state(&handle, ConnectionState::Connected).await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager tests against real sockets on an in-process server.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use vidchat::backoff::ReconnectPolicy;
use vidchat::connection::{ConnectionConfig, ConnectionManager, OutgoingMessage};
use vidchat::events::{ChatEvent, EventBridge};
use vidchat::identity::StaticIdentity;
use vidchat::state::ConnectionState;
use vidchat::storage::MemoryStore;
use vidchat::store::MessageStore;
use vidchat::test_support::{spawn_refusing_server, spawn_ws_server, wait_until, ServerSocket};

const TIMEOUT: Duration = Duration::from_secs(5);

fn quick_policy() -> ReconnectPolicy {
    ReconnectPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(10), max_attempts: 5 }
}

fn manager(addr: SocketAddr, heartbeat: Duration) -> ConnectionManager {
    let config = ConnectionConfig {
        ws_url: format!("ws://{addr}/apis/ws"),
        heartbeat,
        policy: quick_policy(),
    };
    let store = Arc::new(MessageStore::new(Arc::new(MemoryStore::new())));
    ConnectionManager::new(config, Arc::new(StaticIdentity::logged_in("me", "tok")), store, EventBridge::new())
}

/// Connect and return the server side once the client reports open.
async fn open(
    mgr: &ConnectionManager,
    sockets: &mut tokio::sync::mpsc::UnboundedReceiver<ServerSocket>,
) -> anyhow::Result<ServerSocket> {
    mgr.connect()?;
    let socket = tokio::time::timeout(TIMEOUT, sockets.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("server stopped"))?;
    wait_until(TIMEOUT, || mgr.is_connected()).await?;
    Ok(socket)
}

/// Next event matching `pred`, skipping others.
async fn next_event(
    rx: &mut broadcast::Receiver<ChatEvent>,
    pred: impl Fn(&ChatEvent) -> bool,
) -> anyhow::Result<ChatEvent> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = rx.recv().await?;
            if pred(&event) {
                return anyhow::Ok(event);
            }
        }
    })
    .await?
}

fn is_message_event(event: &ChatEvent) -> bool {
    matches!(event, ChatEvent::MessageReceived { .. } | ChatEvent::UnreadChanged { .. })
}

#[tokio::test]
async fn token_is_sent_as_query_parameter() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));

    let socket = open(&mgr, &mut sockets).await?;
    assert_eq!(socket.uri, "/apis/ws?token=tok");
    assert_eq!(mgr.state(), ConnectionState::Open);
    assert_eq!(mgr.reconnect_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn connect_while_live_opens_no_second_socket() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();

    mgr.connect()?;
    mgr.connect()?;
    let _socket = tokio::time::timeout(TIMEOUT, sockets.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("server stopped"))?;
    wait_until(TIMEOUT, || mgr.is_connected()).await?;

    mgr.connect()?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sockets.try_recv().is_err(), "only one socket may be opened");
    assert_eq!(mgr.state(), ConnectionState::Open);

    let mut changes = Vec::new();
    while let Ok(ChatEvent::ConnectionChanged { state, .. }) = events.try_recv() {
        changes.push(state);
    }
    assert_eq!(changes, vec![ConnectionState::Connecting, ConnectionState::Open]);
    Ok(())
}

#[tokio::test]
async fn inbound_message_counts_as_unread() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    let mut socket = open(&mgr, &mut sockets).await?;

    socket
        .send_json(&serde_json::json!({
            "sender_id": "u2",
            "receiver_id": "me",
            "content": "hello",
            "send_time": "2024-01-01T00:00:00Z",
        }))
        .await?;

    let ChatEvent::MessageReceived { message } = next_event(&mut events, is_message_event).await? else {
        anyhow::bail!("expected MessageReceived first");
    };
    assert_eq!(message.sender_id, "u2");
    assert!(!message.is_self);
    assert_eq!(next_event(&mut events, is_message_event).await?, ChatEvent::UnreadChanged { total: 1 });

    let stored = mgr.store().messages("u2");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "hello");
    let contact = mgr.store().contact("u2").ok_or_else(|| anyhow::anyhow!("contact missing"))?;
    assert_eq!(contact.unread_count, 1);
    assert_eq!(contact.last_message.as_deref(), Some("hello"));
    Ok(())
}

#[tokio::test]
async fn message_for_active_contact_is_not_unread() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    let mut socket = open(&mgr, &mut sockets).await?;

    mgr.store().set_active_contact(Some("u2"));
    socket.send_json(&serde_json::json!({"sender_id": "u2", "content": "hi"})).await?;

    next_event(&mut events, |e| matches!(e, ChatEvent::MessageReceived { .. })).await?;
    assert_eq!(next_event(&mut events, is_message_event).await?, ChatEvent::UnreadChanged { total: 0 });
    // Missing receiver defaults to the local user.
    assert_eq!(mgr.store().messages("u2")[0].receiver_id, "me");
    Ok(())
}

#[tokio::test]
async fn send_transmits_frame_and_echoes_locally() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut socket = open(&mgr, &mut sockets).await?;

    let sent = mgr.send(OutgoingMessage::new("u2", "hey").at("2024-05-01T10:00:00Z"))?;
    assert!(sent.is_self);
    assert_eq!(sent.sender_id, "me");

    let frame = socket.recv_json(TIMEOUT).await?;
    assert_eq!(
        frame,
        serde_json::json!({
            "sender_id": "me",
            "receiver_id": "u2",
            "content": "hey",
            "send_time": "2024-05-01T10:00:00Z",
        })
    );

    let stored = mgr.store().messages("u2");
    assert_eq!(stored, vec![sent]);
    assert_eq!(mgr.store().total_unread(), 0);
    Ok(())
}

#[tokio::test]
async fn send_stamps_current_time_when_unset() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut socket = open(&mgr, &mut sockets).await?;

    let sent = mgr.send(OutgoingMessage::new("u2", "now"))?;
    assert!(chrono::DateTime::parse_from_rfc3339(&sent.send_time).is_ok(), "{}", sent.send_time);

    let frame = socket.recv_json(TIMEOUT).await?;
    assert_eq!(frame["send_time"], sent.send_time.as_str());
    Ok(())
}

#[tokio::test]
async fn heartbeat_is_sent_while_open() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_millis(50));
    let mut socket = open(&mgr, &mut sockets).await?;

    for _ in 0..2 {
        let frame = socket.recv_json(TIMEOUT).await?;
        assert_eq!(frame, serde_json::json!({"type": "heartbeat"}));
    }
    Ok(())
}

#[tokio::test]
async fn control_frames_are_consumed_silently() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    let mut socket = open(&mgr, &mut sockets).await?;

    socket.send_text("ping").await?;
    socket.send_json(&serde_json::json!({"type": "pong"})).await?;
    socket.send_json(&serde_json::json!({"type": "heartbeat"})).await?;
    socket.send_json(&serde_json::json!({"sender_id": "u2", "content": "after"})).await?;

    // The first non-state event is the chat message; no pong goes back.
    let event = next_event(&mut events, |e| !matches!(e, ChatEvent::ConnectionChanged { .. })).await?;
    assert!(matches!(event, ChatEvent::MessageReceived { .. }), "{event:?}");
    assert!(socket.recv_text(Duration::from_millis(200)).await.is_err());
    assert_eq!(mgr.store().messages("u2").len(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_dropped() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    let mut socket = open(&mgr, &mut sockets).await?;

    socket.send_text("not json at all").await?;
    socket.send_text(r#"{"sender_id":"u2""#).await?;
    socket.send_json(&serde_json::json!({"sender_id": "u2", "content": "ok"})).await?;

    let event = next_event(&mut events, |e| !matches!(e, ChatEvent::ConnectionChanged { .. })).await?;
    assert!(matches!(event, ChatEvent::MessageReceived { .. }), "{event:?}");
    assert_eq!(mgr.store().messages("u2").len(), 1);
    assert!(mgr.is_connected());
    Ok(())
}

#[tokio::test]
async fn non_chat_json_is_republished() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    let mut socket = open(&mgr, &mut sockets).await?;

    let notice = serde_json::json!({"type": "notice", "text": "maintenance"});
    socket.send_json(&notice).await?;

    let event = next_event(&mut events, |e| matches!(e, ChatEvent::Frame { .. })).await?;
    assert_eq!(event, ChatEvent::Frame { payload: notice });
    assert!(mgr.store().contacts().is_empty());
    Ok(())
}

#[tokio::test]
async fn disconnect_closes_socket_and_suppresses_reconnect() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut socket = open(&mgr, &mut sockets).await?;

    mgr.disconnect();
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    socket.expect_close(TIMEOUT).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sockets.try_recv().is_err(), "no reconnect after disconnect");
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert_eq!(mgr.reconnect_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn dropped_socket_reconnects_and_resets_attempts() -> anyhow::Result<()> {
    let (addr, mut sockets, _server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    let socket = open(&mgr, &mut sockets).await?;

    socket.drop_connection();
    let event = next_event(&mut events, |e| {
        matches!(e, ChatEvent::ConnectionChanged { state: ConnectionState::Reconnecting, .. })
    })
    .await?;
    assert_eq!(event, ChatEvent::ConnectionChanged { state: ConnectionState::Reconnecting, attempts: 1 });

    let _second = tokio::time::timeout(TIMEOUT, sockets.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("server stopped"))?;
    wait_until(TIMEOUT, || mgr.is_connected()).await?;
    assert_eq!(mgr.reconnect_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn send_after_drop_fails() -> anyhow::Result<()> {
    let (addr, sockets, server) = spawn_ws_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    mgr.connect()?;
    wait_until(TIMEOUT, || mgr.is_connected()).await?;

    // Stop accepting, then drop the queued server half of the open socket.
    server.abort();
    drop(sockets);
    wait_until(TIMEOUT, || !mgr.is_connected()).await?;

    let err = mgr.send(OutgoingMessage::new("u2", "lost")).err().map(|e| e.code);
    assert_eq!(err, Some(vidchat::error::ErrorCode::NotConnected));
    assert!(mgr.store().messages("u2").is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_exhausts_attempts() -> anyhow::Result<()> {
    let (addr, accepts, _server) = spawn_refusing_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    let mut events = mgr.subscribe();
    mgr.connect()?;

    let mut reconnecting = Vec::new();
    let final_event = tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await? {
                ChatEvent::ConnectionChanged { state: ConnectionState::Reconnecting, attempts } => {
                    reconnecting.push(attempts);
                }
                event @ ChatEvent::ConnectionChanged { state: ConnectionState::ClosedFinal, .. } => {
                    return anyhow::Ok(event);
                }
                _ => {}
            }
        }
    })
    .await??;

    assert_eq!(final_event, ChatEvent::ConnectionChanged { state: ConnectionState::ClosedFinal, attempts: 5 });
    assert_eq!(reconnecting, vec![1, 2, 3, 4, 5]);
    // Initial attempt plus five retries.
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
    assert_eq!(mgr.state(), ConnectionState::ClosedFinal);

    // No further attempts once final.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
    Ok(())
}

#[tokio::test]
async fn connect_after_closed_final_starts_fresh() -> anyhow::Result<()> {
    let (addr, accepts, _server) = spawn_refusing_server().await?;
    let mgr = manager(addr, Duration::from_secs(30));
    mgr.connect()?;
    wait_until(TIMEOUT, || mgr.state() == ConnectionState::ClosedFinal).await?;

    mgr.connect()?;
    wait_until(TIMEOUT, || accepts.load(Ordering::SeqCst) > 6).await?;
    wait_until(TIMEOUT, || mgr.state() == ConnectionState::ClosedFinal).await?;
    assert_eq!(accepts.load(Ordering::SeqCst), 12);
    Ok(())
}

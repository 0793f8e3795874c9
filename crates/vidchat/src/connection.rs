// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager: the single chat websocket.
//!
//! One background task per session owns the socket and both timers. It
//! connects, pumps frames until the socket fails, then either sleeps for the
//! next backoff delay or gives up in `ClosedFinal`. `disconnect()` cancels the
//! session token; every state write from a session checks that token under the
//! shared lock, so nothing a torn-down session does is observable afterwards.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{ChatError, ErrorCode};
use crate::events::{ChatEvent, EventBridge};
use crate::identity::IdentityProvider;
use crate::protocol::{build_ws_url, classify, ChatFrame, Inbound, HEARTBEAT_FRAME};
use crate::state::ConnectionState;
use crate::store::{Message, MessageStore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Websocket endpoint without the token parameter.
    pub ws_url: String,
    pub heartbeat: Duration,
    pub policy: ReconnectPolicy,
}

impl ConnectionConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            heartbeat: Duration::from_secs(30),
            policy: ReconnectPolicy::default(),
        }
    }
}

/// A message the local user wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub receiver_id: String,
    pub content: String,
    /// Defaults to the current UTC time when unset or empty.
    pub send_time: Option<String>,
}

impl OutgoingMessage {
    pub fn new(receiver_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { receiver_id: receiver_id.into(), content: content.into(), send_time: None }
    }

    pub fn at(mut self, send_time: impl Into<String>) -> Self {
        self.send_time = Some(send_time.into());
        self
    }
}

/// Owner of the chat socket. Dropping the manager disconnects.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<MessageStore>,
    events: EventBridge,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    attempts: u32,
    session: Option<Session>,
}

struct Session {
    cancel: CancellationToken,
    /// Writer queue into the socket; present only while open.
    outbound: Option<mpsc::UnboundedSender<String>>,
}

enum AfterClose {
    Retry(Duration),
    Stop,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<MessageStore>,
        events: EventBridge,
    ) -> Self {
        let inner = Inner { config, identity, store, events, shared: Mutex::new(Shared::default()) };
        Self { inner: Arc::new(inner) }
    }

    /// Start connecting. No-op while a session is live.
    ///
    /// Must be called from within a tokio runtime. Calling from `ClosedFinal`
    /// starts a fresh backoff schedule.
    pub fn connect(&self) -> Result<(), ChatError> {
        if !self.inner.identity.is_logged_in() {
            debug!("chat connect skipped: not logged in");
            return Err(ErrorCode::NotLoggedIn.to_error("log in before connecting"));
        }

        let cancel = {
            let mut shared = self.inner.shared.lock();
            if shared.state.is_live() {
                return Ok(());
            }
            let cancel = CancellationToken::new();
            shared.attempts = 0;
            shared.session = Some(Session { cancel: cancel.clone(), outbound: None });
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
            cancel
        };

        tokio::spawn(run_session(Arc::clone(&self.inner), cancel));
        Ok(())
    }

    /// Tear down the session: cancel timers, close the socket, suppress reconnect.
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        if let Some(session) = shared.session.take() {
            session.cancel.cancel();
            info!("chat disconnected");
        }
        shared.attempts = 0;
        self.inner.set_state(&mut shared, ConnectionState::Disconnected);
    }

    /// User-initiated reconnect: tear down, then connect with a fresh schedule.
    pub fn reconnect(&self) -> Result<(), ChatError> {
        self.disconnect();
        self.connect()
    }

    /// Send a chat message and echo it into the store.
    ///
    /// Fails with `NotConnected` unless the socket is open; nothing is queued.
    pub fn send(&self, outgoing: OutgoingMessage) -> Result<Message, ChatError> {
        let outbound = {
            let shared = self.inner.shared.lock();
            match (shared.state, shared.session.as_ref().and_then(|s| s.outbound.clone())) {
                (ConnectionState::Open, Some(tx)) => tx,
                _ => return Err(ErrorCode::NotConnected.to_error("chat socket is not open")),
            }
        };

        let send_time = outgoing
            .send_time
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let frame = ChatFrame {
            sender_id: self.inner.identity.current_user_id(),
            receiver_id: outgoing.receiver_id,
            content: outgoing.content,
            send_time,
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| ErrorCode::Encode.to_error(e.to_string()))?;
        outbound
            .send(text)
            .map_err(|_| ErrorCode::NotConnected.to_error("chat socket closed"))?;

        let message = frame.into_message(true);
        self.inner.store.append(message.clone());
        Ok(message)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().attempts
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.inner.store
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state == next {
            return;
        }
        debug!(prev = %shared.state, next = %next, attempts = shared.attempts, "chat state");
        shared.state = next;
        self.events.publish(ChatEvent::ConnectionChanged { state: next, attempts: shared.attempts });
    }

    /// Enter `Connecting` for the next attempt. False once the session is torn down.
    fn begin_attempt(&self, cancel: &CancellationToken) -> bool {
        let mut shared = self.shared.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.set_state(&mut shared, ConnectionState::Connecting);
        true
    }

    fn on_open(&self, cancel: &CancellationToken, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut shared = self.shared.lock();
        if cancel.is_cancelled() {
            return false;
        }
        if let Some(session) = shared.session.as_mut() {
            session.outbound = Some(outbound);
        }
        shared.attempts = 0;
        self.set_state(&mut shared, ConnectionState::Open);
        info!("chat connected");
        true
    }

    fn after_close(&self, cancel: &CancellationToken) -> AfterClose {
        let mut shared = self.shared.lock();
        if cancel.is_cancelled() {
            return AfterClose::Stop;
        }
        if let Some(session) = shared.session.as_mut() {
            session.outbound = None;
        }

        match self.config.policy.delay(shared.attempts) {
            Some(delay) => {
                shared.attempts += 1;
                self.set_state(&mut shared, ConnectionState::Reconnecting);
                debug!(attempt = shared.attempts, delay_ms = delay.as_millis() as u64, "chat reconnect scheduled");
                AfterClose::Retry(delay)
            }
            None => {
                shared.session = None;
                self.set_state(&mut shared, ConnectionState::ClosedFinal);
                warn!(attempts = shared.attempts, "chat reconnect attempts exhausted");
                AfterClose::Stop
            }
        }
    }

    /// Pump one open socket until it fails or the session is cancelled.
    async fn pump(&self, ws: WsStream, cancel: &CancellationToken) {
        let (mut write, mut read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        if !self.on_open(cancel, out_tx) {
            let _ = write.send(WsMessage::Close(None)).await;
            return;
        }

        let period = self.config.heartbeat.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = write.send(WsMessage::Text(HEARTBEAT_FRAME.to_owned().into())).await {
                        debug!(err = %e, "chat heartbeat failed");
                        break;
                    }
                }
                Some(text) = out_rx.recv() => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        debug!(err = %e, "chat send failed");
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => self.dispatch(text.as_str()),
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("chat socket closed");
                            break;
                        }
                        Some(Err(e)) => {
                            debug!(err = %e, "chat socket error");
                            break;
                        }
                        Some(Ok(_)) => {} // binary, ping, pong
                    }
                }
            }
        }
    }

    /// Route one inbound text frame.
    fn dispatch(&self, text: &str) {
        let local_id = self.identity.current_user_id();
        match classify(text, &local_id) {
            Err(e) => warn!(err = %e, "dropping malformed chat frame"),
            Ok(Inbound::Control(kind)) => trace!(?kind, "chat control frame"),
            Ok(Inbound::Chat(frame)) => {
                let message = frame.into_message(false);
                debug!(contact = %message.sender_id, "chat message received");
                self.store.append(message.clone());
                self.events.publish(ChatEvent::MessageReceived { message });
                self.events.publish(ChatEvent::UnreadChanged { total: self.store.total_unread() });
            }
            Ok(Inbound::Other(payload)) => {
                self.events.publish(ChatEvent::Frame { payload });
            }
        }
    }
}

/// Session task: connect, pump, back off, repeat.
async fn run_session(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        if !inner.begin_attempt(&cancel) {
            break;
        }

        let url = build_ws_url(&inner.config.ws_url, inner.identity.token().as_deref());
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };
        match connected {
            Ok((ws, _)) => inner.pump(ws, &cancel).await,
            Err(e) => debug!(err = %e, "chat connect failed"),
        }

        match inner.after_close(&cancel) {
            AfterClose::Retry(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            AfterClose::Stop => break,
        }
    }
    trace!("chat session task exited");
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

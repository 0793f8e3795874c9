// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: in-process websocket servers and assertion helpers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Server side of one accepted chat socket.
pub struct ServerSocket {
    /// Request target, e.g. `/apis/ws?token=abc`.
    pub uri: String,
    ws: WebSocketStream<TcpStream>,
}

impl ServerSocket {
    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws
            .send(WsMessage::Text(text.to_owned().into()))
            .await
            .map_err(|e| anyhow::anyhow!("ws send: {e}"))
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) -> anyhow::Result<()> {
        self.send_text(&serde_json::to_string(value)?).await
    }

    /// Next text frame, skipping protocol-level ping/pong.
    pub async fn recv_text(&mut self, timeout: Duration) -> anyhow::Result<String> {
        loop {
            let msg = tokio::time::timeout(timeout, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
                .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
                .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
            match msg {
                WsMessage::Text(text) => return Ok(text.as_str().to_owned()),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => anyhow::bail!("expected Text message, got {other:?}"),
            }
        }
    }

    pub async fn recv_json(&mut self, timeout: Duration) -> anyhow::Result<serde_json::Value> {
        let text = self.recv_text(timeout).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Wait for the peer to close. Errors if a text frame arrives first.
    pub async fn expect_close(&mut self, timeout: Duration) -> anyhow::Result<()> {
        loop {
            let next = tokio::time::timeout(timeout, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?;
            match next {
                None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => return Ok(()),
                Some(Ok(WsMessage::Text(text))) => anyhow::bail!("unexpected text frame: {}", text.as_str()),
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Drop the TCP connection without a close handshake.
    pub fn drop_connection(self) {
        drop(self.ws);
    }
}

/// Spawn a websocket server on an ephemeral port.
///
/// Each accepted socket is handed to the test over the returned channel.
pub async fn spawn_ws_server(
) -> anyhow::Result<(SocketAddr, mpsc::UnboundedReceiver<ServerSocket>, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let mut uri = String::new();
            let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                uri = req.uri().to_string();
                Ok(resp)
            };
            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, capture).await else {
                continue;
            };
            if tx.send(ServerSocket { uri, ws }).is_err() {
                break;
            }
        }
    });
    Ok((addr, rx, handle))
}

/// Spawn a TCP server that drops every connection before the websocket
/// handshake. Returns the number of connection attempts seen.
pub async fn spawn_refusing_server(
) -> anyhow::Result<(SocketAddr, Arc<AtomicU32>, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&accepts);
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    Ok((addr, accepts, handle))
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

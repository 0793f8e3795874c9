// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat wire protocol: UTF-8 JSON text frames over a websocket.
//!
//! - Chat frame (both directions): `{sender_id, receiver_id, content, send_time}`.
//! - Heartbeat (client to server, every heartbeat interval while open):
//!   `{"type":"heartbeat"}`. The client never answers `ping` with `pong`.
//! - Inbound `ping`/`pong`/`heartbeat`, bare or as `{"type": ...}`, are control
//!   frames and are consumed without effect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Message;

/// Keep-alive frame the client sends while the socket is open.
pub const HEARTBEAT_FRAME: &str = r#"{"type":"heartbeat"}"#;

/// One chat transmission as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub send_time: String,
}

impl ChatFrame {
    pub fn into_message(self, is_self: bool) -> Message {
        Message {
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            send_time: self.send_time,
            is_self,
        }
    }
}

/// Liveness frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Ping,
    Pong,
    Heartbeat,
}

impl ControlKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlKind),
    Chat(ChatFrame),
    /// Valid JSON that is neither control nor chat.
    Other(Value),
}

/// Classify an inbound text frame.
///
/// Chat frames need non-empty string `sender_id` and `content`; a missing or
/// empty `receiver_id` defaults to `local_user_id`. Errors only when the text
/// is not JSON (and not a bare control word).
pub fn classify(text: &str, local_user_id: &str) -> Result<Inbound, serde_json::Error> {
    if let Some(kind) = ControlKind::parse(text.trim()) {
        return Ok(Inbound::Control(kind));
    }

    let value: Value = serde_json::from_str(text)?;
    if let Some(kind) = control_kind(&value) {
        return Ok(Inbound::Control(kind));
    }

    match chat_frame(&value, local_user_id) {
        Some(frame) => Ok(Inbound::Chat(frame)),
        None => Ok(Inbound::Other(value)),
    }
}

fn chat_frame(value: &Value, local_user_id: &str) -> Option<ChatFrame> {
    let field = |name: &str| value.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());
    Some(ChatFrame {
        sender_id: field("sender_id")?.to_owned(),
        receiver_id: field("receiver_id").unwrap_or(local_user_id).to_owned(),
        content: field("content")?.to_owned(),
        send_time: value.get("send_time").and_then(Value::as_str).unwrap_or_default().to_owned(),
    })
}

fn control_kind(value: &Value) -> Option<ControlKind> {
    match value {
        Value::String(s) => ControlKind::parse(s),
        Value::Object(map) => map.get("type").and_then(Value::as_str).and_then(ControlKind::parse),
        _ => None,
    }
}

/// Build the chat socket URL: websocket endpoint plus `token` query parameter.
///
/// `http(s)://` bases are rewritten to `ws(s)://`. The token is
/// form-urlencoded.
pub fn build_ws_url(base_url: &str, token: Option<&str>) -> String {
    let mut target = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else {
        base_url.replacen("http://", "ws://", 1)
    };

    if let Some(token) = token {
        let sep = if target.contains('?') { '&' } else { '?' };
        target.push(sep);
        target.push_str("token=");
        target.extend(url::form_urlencoded::byte_serialize(token.as_bytes()));
    }
    target
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;

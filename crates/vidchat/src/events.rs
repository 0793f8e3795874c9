// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bridge: republishes inbound chat traffic and connection changes to
//! any number of subscribers.
//!
//! Delivery is fire-and-forget. Subscribers only see events published after
//! they subscribe, and a subscriber that falls more than the channel capacity
//! behind skips ahead (`RecvError::Lagged`).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::ConnectionState;
use crate::store::Message;

/// Events emitted to UI layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A chat frame from another user was stored.
    MessageReceived { message: Message },
    /// Total unread count across all contacts after an inbound message.
    UnreadChanged { total: u32 },
    /// A decoded frame that is neither control nor chat.
    Frame { payload: serde_json::Value },
    /// The connection manager changed state.
    ConnectionChanged { state: ConnectionState, attempts: u32 },
}

/// Broadcast hub for [`ChatEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; returns how many received it.
    pub fn publish(&self, event: ChatEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;

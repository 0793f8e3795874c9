// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented chat client: wires the collaborators together and runs
//! terminal commands against them.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::ChatConfig;
use crate::connection::{ConnectionConfig, ConnectionManager, OutgoingMessage};
use crate::error::ChatError;
use crate::events::{ChatEvent, EventBridge};
use crate::follow::{sync_follows, FollowListSource, HttpFollowSource};
use crate::identity::{IdentityProvider, StoredIdentity};
use crate::state::ConnectionState;
use crate::storage::{FileStore, KvStore};
use crate::store::{Contact, MessageStore};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `@<uuid> <text>`
    Send { to: String, text: String },
    /// `/open <uuid>`
    Open(String),
    Close,
    Contacts,
    Follows,
    Reconnect,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix('@') {
            let Some((to, text)) = rest.split_once(char::is_whitespace) else {
                anyhow::bail!("usage: @<uuid> <text>");
            };
            let text = text.trim();
            if to.is_empty() || text.is_empty() {
                anyhow::bail!("usage: @<uuid> <text>");
            }
            return Ok(Self::Send { to: to.to_owned(), text: text.to_owned() });
        }

        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (line, ""),
        };
        match (word, arg) {
            ("/open", "") => anyhow::bail!("usage: /open <uuid>"),
            ("/open", uuid) => Ok(Self::Open(uuid.to_owned())),
            ("/close", _) => Ok(Self::Close),
            ("/contacts", _) => Ok(Self::Contacts),
            ("/follows", _) => Ok(Self::Follows),
            ("/reconnect", _) => Ok(Self::Reconnect),
            ("/quit", _) => Ok(Self::Quit),
            _ => anyhow::bail!("unknown command: {word}"),
        }
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
    None,
}

/// The assembled client.
pub struct ChatClient {
    store: Arc<MessageStore>,
    follows: Arc<dyn FollowListSource>,
    connection: ConnectionManager,
}

impl ChatClient {
    pub fn new(
        config: ConnectionConfig,
        storage: Arc<dyn KvStore>,
        identity: Arc<dyn IdentityProvider>,
        follows: Arc<dyn FollowListSource>,
    ) -> Self {
        let store = Arc::new(MessageStore::restore(storage));
        let connection = ConnectionManager::new(config, identity, Arc::clone(&store), EventBridge::new());
        Self { store, follows, connection }
    }

    /// Build from CLI configuration: file-backed storage, stored identity
    /// (seeded from `--token`/`--user-id`), HTTP follow list.
    pub fn from_config(config: &ChatConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn KvStore> = Arc::new(FileStore::open(&config.store_path));
        let identity = Arc::new(StoredIdentity::new(Arc::clone(&storage)));
        if let (Some(token), Some(user_id)) = (&config.token, &config.user_id) {
            identity.login(token, user_id)?;
        }
        let identity: Arc<dyn IdentityProvider> = identity;
        let follows = HttpFollowSource::new(&config.api_url, Arc::clone(&identity), config.follow_page_limit)?;
        Ok(Self::new(config.connection_config(), storage, identity, Arc::new(follows)))
    }

    pub fn connect(&self) -> Result<(), ChatError> {
        self.connection.connect()
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.connection.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub async fn sync_follows(&self) -> anyhow::Result<usize> {
        sync_follows(self.follows.as_ref(), &self.store).await
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<Reply> {
        match command {
            Command::Send { to, text } => {
                let message = self.connection.send(OutgoingMessage::new(to, text))?;
                Ok(Reply::Text(format!("-> {}: {}", message.receiver_id, message.content)))
            }
            Command::Open(uuid) => {
                self.store.set_active_contact(Some(&uuid));
                let history = self.store.messages(&uuid);
                if history.is_empty() {
                    return Ok(Reply::Text(format!("[{uuid}] no messages")));
                }
                let lines: Vec<String> = history
                    .iter()
                    .map(|m| {
                        let who = if m.is_self { "me" } else { m.sender_id.as_str() };
                        format!("[{}] {who}: {}", m.send_time, m.content)
                    })
                    .collect();
                Ok(Reply::Text(lines.join("\n")))
            }
            Command::Close => {
                self.store.set_active_contact(None);
                Ok(Reply::None)
            }
            Command::Contacts => {
                let contacts = self.store.contacts();
                if contacts.is_empty() {
                    return Ok(Reply::Text("no contacts".to_owned()));
                }
                let lines: Vec<String> = contacts.iter().map(format_contact).collect();
                Ok(Reply::Text(lines.join("\n")))
            }
            Command::Follows => {
                let count = self.sync_follows().await?;
                Ok(Reply::Text(format!("synced {count} follows")))
            }
            Command::Reconnect => {
                self.connection.reconnect()?;
                Ok(Reply::None)
            }
            Command::Quit => Ok(Reply::Quit),
        }
    }
}

fn format_contact(contact: &Contact) -> String {
    let name = if contact.nickname.is_empty() { contact.uuid.as_str() } else { contact.nickname.as_str() };
    let mut line = format!("{} {name}", contact.uuid);
    if contact.is_followed {
        line.push_str(" (following)");
    }
    if contact.unread_count > 0 {
        line.push_str(&format!(" [{} unread]", contact.unread_count));
    }
    if let Some(last) = &contact.last_message {
        line.push_str(&format!(" {last}"));
    }
    line
}

/// Terminal rendering of a chat event. `None` for events not worth a line.
pub fn format_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::MessageReceived { message } => {
            Some(format!("<- {}: {}", message.sender_id, message.content))
        }
        ChatEvent::UnreadChanged { .. } => None,
        ChatEvent::Frame { payload } => Some(format!("frame: {payload}")),
        ChatEvent::ConnectionChanged { state: ConnectionState::Reconnecting, attempts } => {
            Some(format!("* reconnecting (attempt {attempts})"))
        }
        ChatEvent::ConnectionChanged { state, .. } => Some(format!("* {state}")),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

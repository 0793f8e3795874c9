// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side message store: per-contact message lists plus the contact
//! directory, persisted as a snapshot on every mutation.
//!
//! The directory stays sorted by `last_time`, newest first; contacts without a
//! parsable timestamp sort last. All methods take `&self`; the lock is held
//! only for the synchronous mutation and persist.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::follow::FollowEntry;
use crate::storage::KvStore;

/// Storage key for the per-contact message lists.
pub const MESSAGES_KEY: &str = "message_store";
/// Storage key for the contact directory.
pub const CONTACTS_KEY: &str = "contacts";

/// One chat transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub send_time: String,
    /// Set locally: true when this client sent the message.
    #[serde(default)]
    pub is_self: bool,
}

impl Message {
    /// The conversation partner this message belongs to.
    pub fn contact_id(&self) -> &str {
        if self.is_self {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// A conversation partner summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub uuid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_time: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_followed: bool,
}

impl Contact {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            nickname: String::new(),
            avatar: String::new(),
            bio: String::new(),
            last_message: None,
            last_time: None,
            unread_count: 0,
            is_followed: false,
        }
    }

    fn apply(&mut self, patch: ContactPatch) {
        if let Some(nickname) = patch.nickname {
            self.nickname = nickname;
        }
        if let Some(avatar) = patch.avatar {
            self.avatar = avatar;
        }
        if let Some(bio) = patch.bio {
            self.bio = bio;
        }
        if let Some(last_message) = patch.last_message {
            self.last_message = Some(last_message);
        }
        if let Some(last_time) = patch.last_time {
            self.last_time = Some(last_time);
        }
        if let Some(unread_count) = patch.unread_count {
            self.unread_count = unread_count;
        }
        if let Some(is_followed) = patch.is_followed {
            self.is_followed = is_followed;
        }
    }

    /// Millisecond timestamp of the last message, if it parses.
    pub fn last_time_ms(&self) -> Option<i64> {
        self.last_time.as_deref().and_then(parse_time_ms)
    }
}

/// Partial contact update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub last_message: Option<String>,
    pub last_time: Option<String>,
    pub unread_count: Option<u32>,
    pub is_followed: Option<bool>,
}

/// Everything the store persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub messages: IndexMap<String, Vec<Message>>,
    pub contacts: Vec<Contact>,
}

/// Change notifications emitted to store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    MessageAppended { contact_id: String },
    ContactsChanged,
    ActiveContactChanged { contact_id: Option<String> },
}

#[derive(Default)]
struct StoreState {
    snapshot: StoreSnapshot,
    active: Option<String>,
}

impl StoreState {
    fn contact_mut(&mut self, uuid: &str) -> &mut Contact {
        let index = match self.snapshot.contacts.iter().position(|c| c.uuid == uuid) {
            Some(index) => index,
            None => {
                self.snapshot.contacts.push(Contact::new(uuid));
                self.snapshot.contacts.len() - 1
            }
        };
        &mut self.snapshot.contacts[index]
    }

    fn sort_contacts(&mut self) {
        // Stable: equal timestamps keep their previous relative order.
        self.snapshot.contacts.sort_by_cached_key(|c| Reverse(c.last_time_ms()));
    }
}

/// Message store shared between the connection manager and UI layers.
pub struct MessageStore {
    storage: Arc<dyn KvStore>,
    state: Mutex<StoreState>,
    changes: broadcast::Sender<StoreChange>,
}

impl MessageStore {
    /// Empty store that persists into `storage`.
    pub fn new(storage: Arc<dyn KvStore>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { storage, state: Mutex::new(StoreState::default()), changes }
    }

    /// Restore from `storage`. Absent or malformed data yields empty state.
    pub fn restore(storage: Arc<dyn KvStore>) -> Self {
        let messages = load_key::<IndexMap<String, Vec<Message>>>(storage.as_ref(), MESSAGES_KEY);
        let contacts = load_key::<Vec<Contact>>(storage.as_ref(), CONTACTS_KEY);

        let mut state = StoreState::default();
        state.snapshot.messages = messages;
        for contact in contacts {
            if state.snapshot.contacts.iter().all(|c| c.uuid != contact.uuid) {
                state.snapshot.contacts.push(contact);
            }
        }
        state.sort_contacts();

        let store = Self::new(storage);
        *store.state.lock() = state;
        store
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Append a message to its contact's list and update the directory.
    pub fn append(&self, message: Message) {
        let contact_id = message.contact_id().to_owned();
        {
            let mut state = self.state.lock();
            let unread = !message.is_self && state.active.as_deref() != Some(contact_id.as_str());
            let last_message = message.content.clone();
            let last_time = message.send_time.clone();

            state.snapshot.messages.entry(contact_id.clone()).or_default().push(message);

            let contact = state.contact_mut(&contact_id);
            contact.last_message = Some(last_message);
            contact.last_time = Some(last_time);
            if unread {
                contact.unread_count = contact.unread_count.saturating_add(1);
            }
            state.sort_contacts();
            self.persist(&state.snapshot);
        }
        self.notify(StoreChange::MessageAppended { contact_id });
        self.notify(StoreChange::ContactsChanged);
    }

    /// Set the active conversation. Activating a contact clears its unread count.
    pub fn set_active_contact(&self, contact_id: Option<&str>) {
        {
            let mut state = self.state.lock();
            state.active = contact_id.map(str::to_owned);
            if let Some(id) = contact_id {
                if let Some(contact) = state.snapshot.contacts.iter_mut().find(|c| c.uuid == id) {
                    contact.unread_count = 0;
                    self.persist(&state.snapshot);
                }
            }
        }
        self.notify(StoreChange::ActiveContactChanged { contact_id: contact_id.map(str::to_owned) });
        self.notify(StoreChange::ContactsChanged);
    }

    /// Merge `patch` into the contact, creating it with defaults if absent.
    pub fn upsert_contact(&self, contact_id: &str, patch: ContactPatch) {
        {
            let mut state = self.state.lock();
            state.contact_mut(contact_id).apply(patch);
            state.sort_contacts();
            self.persist(&state.snapshot);
        }
        self.notify(StoreChange::ContactsChanged);
    }

    /// Make the directory's follow flags mirror `follows` exactly.
    pub fn sync_from_follow_list(&self, follows: &[FollowEntry]) {
        {
            let mut state = self.state.lock();
            for contact in &mut state.snapshot.contacts {
                contact.is_followed = false;
            }
            for entry in follows {
                state.contact_mut(&entry.uuid).apply(ContactPatch {
                    nickname: Some(entry.nickname.clone()),
                    avatar: Some(entry.avatar.clone()),
                    bio: Some(entry.bio.clone()),
                    is_followed: Some(true),
                    ..ContactPatch::default()
                });
            }
            state.sort_contacts();
            self.persist(&state.snapshot);
        }
        self.notify(StoreChange::ContactsChanged);
    }

    /// Sum of unread counts across all contacts.
    pub fn total_unread(&self) -> u32 {
        self.state.lock().snapshot.contacts.iter().map(|c| c.unread_count).sum()
    }

    pub fn messages(&self, contact_id: &str) -> Vec<Message> {
        self.state.lock().snapshot.messages.get(contact_id).cloned().unwrap_or_default()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.state.lock().snapshot.contacts.clone()
    }

    pub fn contact(&self, contact_id: &str) -> Option<Contact> {
        self.state.lock().snapshot.contacts.iter().find(|c| c.uuid == contact_id).cloned()
    }

    pub fn active_contact(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().snapshot.clone()
    }

    /// Write both keys in one storage call so file-backed stores never hold
    /// messages and contacts from different mutations.
    fn persist(&self, snapshot: &StoreSnapshot) {
        if let Err(e) = write_snapshot(self.storage.as_ref(), snapshot) {
            tracing::warn!(err = %e, "failed to persist message store");
        }
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

fn load_key<T: serde::de::DeserializeOwned + Default>(storage: &dyn KvStore, key: &str) -> T {
    let Some(raw) = storage.get(key) else {
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, err = %e, "discarding malformed stored snapshot");
            T::default()
        }
    }
}

fn write_snapshot(storage: &dyn KvStore, snapshot: &StoreSnapshot) -> anyhow::Result<()> {
    let messages = serde_json::to_string(&snapshot.messages)?;
    let contacts = serde_json::to_string(&snapshot.contacts)?;
    storage.set_many(&[(MESSAGES_KEY, &messages), (CONTACTS_KEY, &contacts)])
}

/// Parse an RFC 3339 timestamp, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_time_ms(raw: &str) -> Option<i64> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc().timestamp_millis())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

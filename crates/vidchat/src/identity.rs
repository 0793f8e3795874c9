// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity of the local user: login state, user id, credential token.

use std::sync::Arc;

use crate::storage::KvStore;

/// Storage key holding the auth credential.
pub const TOKEN_KEY: &str = "video-web-golang-token";
/// Storage key holding the logged-in user's uuid.
pub const USER_ID_KEY: &str = "video-web-golang-user-id";

/// Source of the local user's identity, consulted on every connect and send.
pub trait IdentityProvider: Send + Sync {
    fn is_logged_in(&self) -> bool;
    /// Uuid of the local user, empty when unknown.
    fn current_user_id(&self) -> String;
    fn token(&self) -> Option<String>;
}

/// Identity read from the key-value store, so login and logout elsewhere
/// take effect on the next call.
pub struct StoredIdentity {
    storage: Arc<dyn KvStore>,
}

impl StoredIdentity {
    pub fn new(storage: Arc<dyn KvStore>) -> Self {
        Self { storage }
    }

    pub fn login(&self, token: &str, user_id: &str) -> anyhow::Result<()> {
        self.storage.set(TOKEN_KEY, token)?;
        self.storage.set(USER_ID_KEY, user_id)?;
        Ok(())
    }

    pub fn logout(&self) -> anyhow::Result<()> {
        self.storage.remove(TOKEN_KEY)?;
        self.storage.remove(USER_ID_KEY)?;
        Ok(())
    }
}

impl IdentityProvider for StoredIdentity {
    fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }

    fn current_user_id(&self) -> String {
        self.storage.get(USER_ID_KEY).unwrap_or_default()
    }

    fn token(&self) -> Option<String> {
        self.storage.get(TOKEN_KEY).filter(|t| !t.is_empty())
    }
}

/// Fixed identity.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub user_id: String,
    pub token: Option<String>,
}

impl StaticIdentity {
    pub fn logged_in(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), token: Some(token.into()) }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn is_logged_in(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn current_user_id(&self) -> String {
        self.user_id.clone()
    }

    fn token(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::backoff::ReconnectPolicy;
use crate::connection::ConnectionConfig;

/// Terminal chat client for the video site's direct messages.
#[derive(Debug, Clone, Parser)]
#[command(name = "vidchat", version, about)]
pub struct ChatConfig {
    /// Chat websocket endpoint (the token is appended as a query parameter).
    #[arg(long, default_value = "ws://127.0.0.1:80/apis/ws", env = "VIDCHAT_WS_URL")]
    pub ws_url: String,

    /// REST API base URL (for the follow list).
    #[arg(long, default_value = "http://127.0.0.1:80/apis", env = "VIDCHAT_API_URL")]
    pub api_url: String,

    /// Session token. Stored on startup together with --user-id.
    #[arg(long, env = "VIDCHAT_TOKEN")]
    pub token: Option<String>,

    /// Local user id.
    #[arg(long, env = "VIDCHAT_USER_ID")]
    pub user_id: Option<String>,

    /// Key-value file holding identity, messages and contacts.
    #[arg(long, default_value = "vidchat-store.json", env = "VIDCHAT_STORE_PATH")]
    pub store_path: PathBuf,

    /// Heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "VIDCHAT_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,

    /// First reconnect delay in milliseconds.
    #[arg(long, default_value_t = 1000, env = "VIDCHAT_RECONNECT_BASE_MS")]
    pub reconnect_base_ms: u64,

    /// Upper bound on any reconnect delay in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "VIDCHAT_RECONNECT_CAP_MS")]
    pub reconnect_cap_ms: u64,

    /// Reconnect attempts before giving up.
    #[arg(long, default_value_t = 5, env = "VIDCHAT_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Follow-list pages fetched per sync.
    #[arg(long, default_value_t = 10, env = "VIDCHAT_FOLLOW_PAGE_LIMIT")]
    pub follow_page_limit: u32,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "VIDCHAT_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "VIDCHAT_LOG_LEVEL")]
    pub log_level: String,
}

impl ChatConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        const SCHEMES: [&str; 4] = ["ws://", "wss://", "http://", "https://"];
        if !SCHEMES.iter().any(|s| self.ws_url.starts_with(s)) {
            anyhow::bail!("--ws-url must start with ws://, wss://, http:// or https://");
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("--api-url must start with http:// or https://");
        }
        if self.heartbeat_ms == 0 {
            anyhow::bail!("--heartbeat-ms must be greater than zero");
        }
        if self.reconnect_base_ms == 0 {
            anyhow::bail!("--reconnect-base-ms must be greater than zero");
        }
        if self.reconnect_cap_ms < self.reconnect_base_ms {
            anyhow::bail!("--reconnect-cap-ms must be at least --reconnect-base-ms");
        }
        if self.token.is_some() != self.user_id.is_some() {
            anyhow::bail!("--token and --user-id must be given together");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: self.reconnect_base(),
            cap: self.reconnect_cap(),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            ws_url: self.ws_url.clone(),
            heartbeat: self.heartbeat_interval(),
            policy: self.reconnect_policy(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

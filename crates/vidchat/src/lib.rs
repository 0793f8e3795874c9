// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vidchat: real-time direct-message client for the video site.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod follow;
pub mod identity;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod store;
pub mod test_support;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::{format_event, ChatClient, Command, Reply};
use crate::config::ChatConfig;

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Run the terminal client until `/quit`, end of input, or Ctrl-C.
pub async fn run(config: ChatConfig) -> anyhow::Result<()> {
    config.validate()?;
    let client = ChatClient::from_config(&config)?;
    info!(store = %config.store_path.display(), "vidchat starting");

    let mut events = client.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = format_event(&event) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    match client.connect() {
        Ok(()) => {
            if let Err(e) = client.sync_follows().await {
                warn!(err = %e, "follow list sync failed");
            }
        }
        Err(e) => warn!(err = %e, "not connecting"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match Command::parse(&line) {
            Ok(command) => client.execute(command).await,
            Err(e) => Err(e),
        };
        match reply {
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::None) => {}
            Ok(Reply::Quit) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }

    client.disconnect();
    printer.abort();
    info!("vidchat stopped");
    Ok(())
}

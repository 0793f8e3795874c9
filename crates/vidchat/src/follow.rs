// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Follow-list collaborator: the users the local user follows, used to
//! refresh contact profiles and follow flags.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::identity::IdentityProvider;
use crate::store::MessageStore;

/// One followed user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEntry {
    pub uuid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
}

/// Supplies the current follow list on demand.
///
/// Object-safe for use as `Arc<dyn FollowListSource>`.
pub trait FollowListSource: Send + Sync {
    fn follow_list(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FollowEntry>>> + Send + '_>>;
}

/// Fixed follow list.
#[derive(Debug, Clone, Default)]
pub struct StaticFollowSource {
    pub entries: Vec<FollowEntry>,
}

impl FollowListSource for StaticFollowSource {
    fn follow_list(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FollowEntry>>> + Send + '_>> {
        let entries = self.entries.clone();
        Box::pin(async move { Ok(entries) })
    }
}

/// Backend response envelope: `{ code, message, data }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FollowPage {
    #[serde(default)]
    follow_list: Option<Vec<FollowEntry>>,
}

/// Follow list fetched page by page from the backend REST API.
pub struct HttpFollowSource {
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
    page_limit: u32,
    client: Client,
}

impl HttpFollowSource {
    pub fn new(
        base_url: impl Into<String>,
        identity: Arc<dyn IdentityProvider>,
        page_limit: u32,
    ) -> anyhow::Result<Self> {
        crate::install_crypto_provider();
        let client = Client::builder().timeout(std::time::Duration::from_secs(10)).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { base_url, identity, page_limit: page_limit.max(1), client })
    }

    /// Fetch one page (1-based).
    async fn fetch_page(&self, page: u32) -> anyhow::Result<Vec<FollowEntry>> {
        let url = format!("{}/follow/get-follow-list?page={page}", self.base_url);
        let mut req = self.client.get(url);
        if let Some(token) = self.identity.token() {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ErrorCode::RequestFailed.to_error(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ErrorCode::RequestFailed.to_error(format!("request failed: HTTP {status}")).into());
        }
        let body: ApiResponse<FollowPage> = resp
            .json()
            .await
            .map_err(|e| ErrorCode::RequestFailed.to_error(format!("request failed: {e}")))?;
        if body.code != 200 {
            return Err(ErrorCode::Rejected.to_error(body.message).into());
        }
        Ok(body.data.and_then(|d| d.follow_list).unwrap_or_default())
    }
}

impl FollowListSource for HttpFollowSource {
    fn follow_list(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FollowEntry>>> + Send + '_>> {
        Box::pin(async move {
            let mut all = Vec::new();
            for page in 1..=self.page_limit {
                let entries = self.fetch_page(page).await?;
                if entries.is_empty() {
                    break;
                }
                all.extend(entries);
            }
            Ok(all)
        })
    }
}

/// Pull the follow list and mirror it into the store's contact directory.
///
/// On error the store is left untouched.
pub async fn sync_follows(
    source: &dyn FollowListSource,
    store: &MessageStore,
) -> anyhow::Result<usize> {
    let follows = source.follow_list().await?;
    store.sync_from_follow_list(&follows);
    tracing::info!(count = follows.len(), "follow list synced");
    Ok(follows.len())
}

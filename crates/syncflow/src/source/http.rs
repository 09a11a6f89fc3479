use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::queue::Credential;
use crate::source::{PageSource, RawPage};

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct SavedTracksPage {
    items: Vec<Value>,
    next: Option<String>,
}

/// Saved-tracks endpoint of the external API (`GET {base}/me/tracks`).
///
/// The `Client` is built once and cloned into every consumer; it pools
/// connections internally.
#[derive(Clone)]
pub struct HttpPageSource {
    client: Client,
    base_url: String,
}

impl HttpPageSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn tracks_url(&self) -> String {
        format!("{}/me/tracks", self.base_url)
    }
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(
        &self,
        credential: &Credential,
        cursor: u32,
        page_size: u32,
    ) -> Result<RawPage> {
        debug!(cursor, page_size, "fetching saved tracks page");

        let response = self
            .client
            .get(self.tracks_url())
            .bearer_auth(credential.expose())
            .query(&[("limit", page_size), ("offset", cursor)])
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::Unauthorized(format!("source returned {status}: {body}")));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(SyncError::RateLimited {
                    retry_after: retry_after(response.headers()),
                });
            }
            s if !s.is_success() => {
                return Err(SyncError::Transport(format!("source returned {s}")));
            }
            _ => {}
        }

        let bytes = response.bytes().await?;
        let page: SavedTracksPage = serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::MalformedRecord(format!("page at offset {cursor} is not decodable: {e}"))
        })?;

        Ok(RawPage {
            items: page.items,
            has_more: page.next.is_some(),
        })
    }
}

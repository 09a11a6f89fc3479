use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::queue::Credential;

pub mod http;
pub mod normalize;

pub use http::HttpPageSource;
pub use normalize::{normalize_page, TrackRow};

/// One page exactly as the external API returned it.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub has_more: bool,
}

/// One page after projection into the sink's row shape.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub records: Vec<TrackRow>,
    pub has_more: bool,
}

/// A single paginated call against the external API.
///
/// Implementations must report `Unauthorized` and `RateLimited` distinctly;
/// anything else transport-related is `Transport`.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, credential: &Credential, cursor: u32, page_size: u32)
        -> Result<RawPage>;

    /// Fetch and normalize. A bad item fails the whole page.
    async fn fetch_page(
        &self,
        credential: &Credential,
        cursor: u32,
        page_size: u32,
    ) -> Result<PageResult> {
        let raw = self.fetch(credential, cursor, page_size).await?;
        Ok(PageResult {
            records: normalize_page(&raw.items)?,
            has_more: raw.has_more,
        })
    }
}

/// Spaces out consecutive fetches made through one handle by at least `interval`.
///
/// This is courtesy pacing towards the API, not a retry wait.
pub struct Paced<S> {
    inner: S,
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<S> Paced<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: PageSource> PageSource for Paced<S> {
    async fn fetch(
        &self,
        credential: &Credential,
        cursor: u32,
        page_size: u32,
    ) -> Result<RawPage> {
        {
            // Held across the sleep so concurrent callers queue up behind it.
            let mut last = self.last_call.lock().await;
            if let Some(at) = *last {
                tokio::time::sleep_until(at + self.interval).await;
            }
            *last = Some(Instant::now());
        }
        self.inner.fetch(credential, cursor, page_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl PageSource for Counting {
        async fn fetch(&self, _: &Credential, _: u32, _: u32) -> Result<RawPage> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RawPage::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paced_source_spaces_out_back_to_back_calls() {
        let src = Paced::new(Counting(AtomicU32::new(0)), Duration::from_millis(250));
        let cred = Credential::new("t");

        let started = Instant::now();
        for cursor in [0, 50, 100] {
            src.fetch(&cred, cursor, 50).await.unwrap();
        }

        assert_eq!(src.inner().0.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}

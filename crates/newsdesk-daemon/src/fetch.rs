/// Fetching the now-playing page for station X.
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
}

pub trait TrackSource: Send + Sync {
    fn fetch_page(&self) -> BoxFuture<'static, Result<String, FetchError>>;
}

/// GET `<relay_prefix><target_url>`, never served from cache.
pub struct HttpTrackSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTrackSource {
    pub fn new(relay_prefix: &str, target_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}{}", relay_prefix, target_url),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TrackSource for HttpTrackSource {
    fn fetch_page(&self) -> BoxFuture<'static, Result<String, FetchError>> {
        let req = self
            .client
            .get(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        Box::pin(async move {
            let resp = req
                .send()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(FetchError::Status(resp.status().as_u16()));
            }
            resp.text()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))
        })
    }
}

pub async fn fetch_with_timeout(
    source: Arc<dyn TrackSource>,
    timeout: Duration,
) -> Result<String, FetchError> {
    tokio::time::timeout(timeout, source.fetch_page())
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
}

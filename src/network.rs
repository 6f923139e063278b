//! HTTP fetching for the crawler.
//!
//! `HttpClient` wraps a configured `reqwest::Client`; the `Fetcher` trait is
//! the seam the crawler worker is generic over, so tests can substitute a
//! canned fetcher.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Capability the crawler needs from the network: fetch a URL, get bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_content_size: usize,
}

impl HttpClient {
    /// Create an HTTP client with the default content size limit.
    pub fn new(user_agent: String, timeout_secs: u64) -> Result<Self, FetchError> {
        Self::with_content_limit(user_agent, timeout_secs, Config::MAX_FETCH_BYTES)
    }

    /// Create an HTTP client with a custom content size limit.
    pub fn with_content_limit(
        user_agent: String,
        timeout_secs: u64,
        max_content: usize,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            // Enable TCP keepalive to maintain long-lived connections and detect dead peers.
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            // Redirects are followed up to reqwest's default limit; TLS
            // verification stays on.
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            max_content_size: max_content,
        })
    }

    /// Fetch a URL and return the response body as raw bytes.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        // Reject oversized bodies early when the server declares a length.
        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_content_size {
                return Err(FetchError::ContentTooLarge(
                    content_length as usize,
                    self.max_content_size,
                ));
            }
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        if body_bytes.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(
                body_bytes.len(),
                self.max_content_size,
            ));
        }

        Ok(body_bytes.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_bytes(url).await
    }
}

/// Fetch failures. The crawl loop treats them all the same way (mark the
/// row `fetch_failed` and move on), so the variants only keep the
/// distinctions worth logging: transport vs. HTTP status vs. our own size
/// cap.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Fetcher that serves a fixed body for every URL; used by the worker tests.
#[derive(Debug, Default)]
pub struct FixedFetcher {
    body: Vec<u8>,
    fail: bool,
    calls: std::sync::atomic::AtomicUsize,
}

impl FixedFetcher {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            fail: false,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// A fetcher whose every fetch fails with a transport error.
    pub fn failing() -> Self {
        Self {
            body: Vec::new(),
            fail: true,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of fetches attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FixedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            return Err(FetchError::Transport("connection refused".to_string()));
        }
        Ok(self.body.clone())
    }
}

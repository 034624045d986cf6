//! HTTP Fetch Contract
//!
//! Stage 2's view of the network: a GET returning raw HTML with a short
//! timeout, a browser-like User-Agent and a bounded redirect chain, plus the
//! Google-RSS redirect resolver owned by an external collaborator.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::redirect::Policy;
use std::time::Duration;
use url::Url;

use crate::config::FetchConfig;

/// Fetch-layer errors, kept separate from LLM errors so Stage 2 failure
/// accounting stays precise.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch timeout")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request error: {0}")]
    Request(String),

    #[error("body decode error: {0}")]
    Decode(String),

    #[error("redirect resolution failed: {0}")]
    Redirect(String),
}

/// Fetch raw HTML for an article URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Resolve an opaque aggregator redirect URL to its destination.
///
/// The production decoder is an external collaborator; the default
/// implementation passes the URL through untouched.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String, FetchError>;
}

/// True for Google News RSS redirect URLs that need decoding before fetch.
pub fn is_google_rss_redirect(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            parsed.host_str() == Some("news.google.com")
                && parsed.path().starts_with("/rss/articles/")
        },
        Err(_) => false,
    }
}

/// reqwest-backed fetcher configured per `[fetch]`.
pub struct HttpContentFetcher {
    client: Client,
}

impl HttpContentFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .expect("Failed to create fetch HTTP client");

        Self { client }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Default resolver: no decoding, the URL is fetched as-is.
pub struct PassthroughResolver;

#[async_trait]
impl RedirectResolver for PassthroughResolver {
    async fn resolve(&self, url: &str) -> Result<String, FetchError> {
        Ok(url.to_string())
    }
}

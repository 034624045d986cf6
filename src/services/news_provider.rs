//! News Provider Contract
//!
//! The ingest-time interface to upstream news sources. Provider clients
//! (HTTP APIs, RSS) are external collaborators; the pipeline only depends on
//! this trait and on the insert semantics below.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::models::article::NewArticle;
use crate::models::holding::Holding;
use crate::services::article_store::ArticleStore;
use crate::utils::{ApiError, ApiResult};

/// Upstream news search, per holding or per macro topic. Results are ordered
/// as the provider returned them.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn fetch_articles_for_holdings(
        &self,
        holdings: &[Holding],
        limit: usize,
    ) -> anyhow::Result<Vec<NewArticle>>;

    async fn fetch_news_from_multiple_sources(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<NewArticle>>;
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub merged: usize,
}

/// Inserts provider results into the store. A URL already present is not
/// re-inserted; its `searched_by` is extended instead, so an article shared
/// by several holdings remembers every search term that found it.
pub struct IngestService {
    store: Arc<ArticleStore>,
    provider: Option<Arc<dyn NewsProvider>>,
}

impl IngestService {
    pub fn new(store: Arc<ArticleStore>, provider: Option<Arc<dyn NewsProvider>>) -> Self {
        Self { store, provider }
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn ingest_for_holdings(
        &self,
        holdings: &[Holding],
        limit: usize,
    ) -> ApiResult<IngestReport> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            ApiError::service_unavailable("No news provider configured")
        })?;

        let articles = provider
            .fetch_articles_for_holdings(holdings, limit)
            .await
            .map_err(|e| ApiError::internal_error(format!("Provider error: {}", e)))?;

        self.insert_all(articles).await
    }

    pub async fn ingest_topic(&self, query: &str, limit: usize) -> ApiResult<IngestReport> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            ApiError::service_unavailable("No news provider configured")
        })?;

        let articles = provider
            .fetch_news_from_multiple_sources(query, limit)
            .await
            .map_err(|e| ApiError::internal_error(format!("Provider error: {}", e)))?;

        self.insert_all(articles).await
    }

    async fn insert_all(&self, articles: Vec<NewArticle>) -> ApiResult<IngestReport> {
        let mut report = IngestReport { fetched: articles.len(), ..IngestReport::default() };

        for article in &articles {
            if article.url.trim().is_empty() {
                continue;
            }
            if self.store.insert(article).await? {
                report.inserted += 1;
            } else if let Some(term) = &article.searched_by {
                self.store.merge_searched_by(&article.url, term).await?;
                report.merged += 1;
            }
        }

        tracing::info!(
            "Ingest: {} fetched, {} inserted, {} merged",
            report.fetched,
            report.inserted,
            report.merged
        );
        Ok(report)
    }
}

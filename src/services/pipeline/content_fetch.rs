//! Stage 2 - Content Fetch
//!
//! Fetches article HTML through a bounded worker pool, extracts the readable
//! text, gates on quality, and populates the identity fields the
//! deduplicator needs. Each row is written from its worker as soon as its
//! fetch settles, so a crashed batch resumes where it stopped.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;

use crate::config::Thresholds;
use crate::models::article::{Article, ArticleStatus};
use crate::services::article_store::ArticleUpdate;
use crate::services::fetcher::{ContentFetcher, RedirectResolver, is_google_rss_redirect};
use crate::services::pipeline::dedup::title_hash_bucket;
use crate::services::pipeline::extract::{
    extract_canonical_url, extract_clean_text, looks_like_boilerplate,
};
use crate::services::pipeline::fingerprint::simhash;
use crate::services::pipeline::stage::{
    Eligibility, PipelineStage, SkipReason, StageContext, StageOutcome,
};
use crate::services::pipeline::url_norm::{normalize_url, normalized_domain};
use crate::utils::truncate_chars;

/// Discarded pages keep only the head of their text for inspection.
const DISCARD_SNIPPET_CHARS: usize = 1000;

pub struct ContentFetchStage {
    fetcher: Arc<dyn ContentFetcher>,
    resolver: Arc<dyn RedirectResolver>,
    thresholds: Thresholds,
}

impl ContentFetchStage {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        resolver: Arc<dyn RedirectResolver>,
        thresholds: Thresholds,
    ) -> Self {
        Self { fetcher, resolver, thresholds }
    }

    /// Fetch and persist one article. Store failures are fatal (they abort
    /// the batch); fetch failures are contained in the outcome.
    async fn fetch_one(&self, row: Article, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        ctx.store
            .apply_update(
                &row.url,
                &ArticleUpdate {
                    increment_fetch_attempts: true,
                    processing_started_at: Some(Utc::now()),
                    ..ArticleUpdate::default()
                },
            )
            .await?;
        let attempts_now = row.fetch_attempts + 1;

        // Previously resolved destination wins; Google RSS links go through
        // the external decoder; everything else is fetched verbatim.
        let fetch_url = match &row.final_url {
            Some(resolved) => resolved.clone(),
            None if is_google_rss_redirect(&row.url) => {
                match self.resolver.resolve(&row.url).await {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        return self
                            .record_fetch_failure(&row, attempts_now, None, e.to_string(), ctx)
                            .await;
                    },
                }
            },
            None => row.url.clone(),
        };

        let html = match self.fetcher.fetch(&fetch_url).await {
            Ok(html) => html,
            Err(e) => {
                return self
                    .record_fetch_failure(&row, attempts_now, Some(fetch_url), e.to_string(), ctx)
                    .await;
            },
        };

        let canonical = extract_canonical_url(&html);
        let clean = extract_clean_text(&html);
        let length = clean.chars().count() as i64;

        if length < self.thresholds.fetch_min_length || looks_like_boilerplate(&clean) {
            ctx.store
                .apply_update(
                    &row.url,
                    &ArticleUpdate {
                        status: Some(ArticleStatus::Discarded),
                        final_url: Some(fetch_url),
                        clean_text: Some(truncate_chars(&clean, DISCARD_SNIPPET_CHARS)),
                        content_length: Some(length),
                        ..ArticleUpdate::default()
                    },
                )
                .await?;
            return Ok(StageOutcome::advanced(&row.url, ArticleStatus::Discarded));
        }

        let update = ArticleUpdate {
            status: Some(ArticleStatus::ContentFetched),
            final_url: Some(fetch_url),
            canonical_url: canonical,
            clean_text: Some(clean.clone()),
            content_length: Some(length),
            content_fingerprint: Some(simhash(&clean)),
            content_fetched_at: Some(Utc::now()),
            normalized_url: Some(normalize_url(&row.url)),
            normalized_domain: normalized_domain(&row.url),
            title_hash_bucket: Some(title_hash_bucket(&row.title)),
            clear_last_error: true,
            ..ArticleUpdate::default()
        };
        ctx.store.apply_update(&row.url, &update).await?;

        Ok(StageOutcome::advanced(&row.url, ArticleStatus::ContentFetched))
    }

    async fn record_fetch_failure(
        &self,
        row: &Article,
        attempts_now: i64,
        final_url: Option<String>,
        error: String,
        ctx: &StageContext,
    ) -> anyhow::Result<StageOutcome> {
        let status = if attempts_now >= self.thresholds.max_fetch_attempts {
            ArticleStatus::Discarded
        } else {
            ArticleStatus::FetchFailed
        };

        tracing::debug!(
            "Fetch failed for {} (attempt {}): {}",
            row.url,
            attempts_now,
            error
        );

        ctx.store
            .apply_update(
                &row.url,
                &ArticleUpdate {
                    status: Some(status),
                    final_url,
                    last_error: Some(truncate_chars(&error, 500)),
                    ..ArticleUpdate::default()
                },
            )
            .await?;

        Ok(StageOutcome::failed(&row.url, error))
    }
}

#[async_trait]
impl PipelineStage for ContentFetchStage {
    fn name(&self) -> &'static str {
        "content_fetch"
    }

    /// The worker pool bounds concurrency, not the batch size.
    fn batch_size(&self) -> usize {
        usize::MAX
    }

    fn check_prerequisites(&self, row: Option<&Article>, _ctx: &StageContext) -> Eligibility {
        let Some(row) = row else {
            return Eligibility::Skip(SkipReason::NotFound);
        };
        let status = row.status_enum();
        if status.is_terminal() {
            return Eligibility::Skip(SkipReason::Terminal);
        }
        if status.is_dedup_original() {
            return Eligibility::Skip(SkipReason::AlreadyProcessed);
        }
        if !matches!(status, ArticleStatus::TitleFiltered | ArticleStatus::FetchFailed) {
            return Eligibility::Skip(SkipReason::WrongStatus);
        }
        if row.should_fetch_full != Some(true) {
            return Eligibility::Skip(SkipReason::NotSelectedForFetch);
        }
        if row.fetch_attempts >= self.thresholds.max_fetch_attempts {
            return Eligibility::Skip(SkipReason::AttemptsExhausted);
        }
        Eligibility::Eligible
    }

    async fn process_batch(
        &self,
        rows: Vec<Article>,
        ctx: &StageContext,
    ) -> anyhow::Result<Vec<StageOutcome>> {
        // `buffered` keeps result order aligned with input order.
        let results: Vec<anyhow::Result<StageOutcome>> = futures::stream::iter(
            rows.into_iter().map(|row| self.fetch_one(row, ctx)),
        )
        .buffered(self.thresholds.stage2_concurrency)
        .collect()
        .await;

        results.into_iter().collect()
    }
}

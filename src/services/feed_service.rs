//! Feed Query
//!
//! Read-only projection over the store: the ranked rows a client renders,
//! falling back to personalized rows while ranking has not caught up yet.
//! Holdings are a prioritization hint upstream (they shaped the scores), not
//! a filter: an empty holdings set still returns results.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::Thresholds;
use crate::models::article::Article;
use crate::utils::ApiResult;

#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sources: Vec<String>,
    pub limit: Option<i64>,
    pub min_score: Option<i64>,
}

const DEFAULT_FEED_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct FeedService {
    pool: SqlitePool,
    thresholds: Thresholds,
}

impl FeedService {
    pub fn new(pool: SqlitePool, thresholds: Thresholds) -> Self {
        Self { pool, thresholds }
    }

    pub async fn feed(&self, query: &FeedQuery) -> ApiResult<Vec<Article>> {
        let ranked = self.query_rows(query, true).await?;
        if !ranked.is_empty() {
            return Ok(ranked);
        }
        // Nothing ranked yet (fresh deployment or ranking lagging): serve the
        // personalized rows so the feed is never empty for no reason.
        self.query_rows(query, false).await
    }

    async fn query_rows(&self, query: &FeedQuery, ranked: bool) -> ApiResult<Vec<Article>> {
        let min_score = query.min_score.unwrap_or(self.thresholds.feed_rank_cutoff);
        let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, 500);

        let mut sql = String::from("SELECT * FROM articles WHERE ");
        if ranked {
            sql.push_str("status = 'ranked' AND is_primary_in_cluster = TRUE");
            sql.push_str(" AND final_rank_score >= ?");
        } else {
            sql.push_str("status = 'personalized'");
            sql.push_str(" AND profile_adjusted_score >= ?");
        }

        if query.from.is_some() {
            sql.push_str(" AND published_at >= ?");
        }
        if query.to.is_some() {
            sql.push_str(" AND published_at <= ?");
        }
        if !query.sources.is_empty() {
            let placeholders = vec!["?"; query.sources.len()].join(", ");
            sql.push_str(&format!(" AND source_name IN ({})", placeholders));
        }

        if ranked {
            sql.push_str(" ORDER BY final_rank_score DESC, published_at DESC LIMIT ?");
        } else {
            sql.push_str(" ORDER BY profile_adjusted_score DESC, published_at DESC LIMIT ?");
        }

        let mut q = sqlx::query_as::<_, Article>(&sql).bind(min_score);
        if let Some(from) = query.from {
            q = q.bind(from);
        }
        if let Some(to) = query.to {
            q = q.bind(to);
        }
        for source in &query.sources {
            q = q.bind(source);
        }
        q = q.bind(limit);

        Ok(q.fetch_all(&self.pool).await?)
    }
}

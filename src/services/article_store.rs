//! Article Store - Database operations for the pipeline state machine
//!
//! Every stage reads rows by URL and writes partial updates; `updated_at` is
//! always refreshed. Batch writes are wrapped in a single transaction so a
//! stage's output is visible atomically.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, SqlitePool};

use crate::models::article::{Article, ArticleStatus, NewArticle};

/// Repository for article rows.
pub struct ArticleStore {
    pool: SqlitePool,
}

/// A partial update of derived fields. `Some` means "write this column";
/// absent fields are left untouched. The flags cover the few non-assignment
/// writes (counters, explicit NULLing of `last_error`).
#[derive(Debug, Clone, Default)]
pub struct ArticleUpdate {
    pub status: Option<ArticleStatus>,

    // Identity / dedup
    pub normalized_url: Option<String>,
    pub canonical_url: Option<String>,
    pub normalized_domain: Option<String>,
    pub title_hash_bucket: Option<String>,
    pub is_duplicate_of_article_id: Option<i64>,

    // Stage 1
    pub title_relevance: Option<i64>,
    pub title_event_type: Option<String>,
    pub title_reason_short: Option<String>,
    pub title_ticker_matches: Option<String>,
    pub title_sector_matches: Option<String>,
    pub should_fetch_full: Option<bool>,
    pub no_holding_mention: Option<bool>,

    // Stage 1.5
    pub likely_impact: Option<i64>,

    // Stage 2
    pub final_url: Option<String>,
    pub clean_text: Option<String>,
    pub content_length: Option<i64>,
    pub content_fingerprint: Option<String>,
    pub content_fetched_at: Option<DateTime<Utc>>,

    // Stage 3
    pub event_type: Option<String>,
    pub impact_score: Option<i64>,
    pub sentiment: Option<f64>,
    pub sentiment_label: Option<String>,
    pub risk_score: Option<i64>,
    pub opportunity_score: Option<i64>,
    pub volatility_score: Option<i64>,
    pub matched_tickers: Option<String>,
    pub matched_sectors: Option<String>,

    // Stage 4
    pub holding_relevance_score: Option<i64>,
    pub profile_adjusted_score: Option<f64>,
    pub profile_type_cached: Option<String>,

    // Stage 5
    pub cluster_id: Option<String>,
    pub is_primary_in_cluster: Option<bool>,
    pub final_rank_score: Option<i64>,
    pub importance_score: Option<i64>,
    pub shown_to_user: Option<bool>,
    pub shown_timestamp: Option<DateTime<Utc>>,

    // Interpretation
    pub verdict: Option<String>,
    pub why_json: Option<String>,
    pub action: Option<String>,
    pub horizon: Option<String>,
    pub opportunity_type: Option<String>,
    pub opportunity_note: Option<String>,
    pub confidence: Option<i64>,

    // Lifecycle
    pub last_error: Option<String>,
    pub clear_last_error: bool,
    pub increment_fetch_attempts: bool,
    pub increment_llm_attempts: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

impl ArticleUpdate {
    /// Shorthand for a bare status transition.
    pub fn status(status: ArticleStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    fn build_sql<'a>(&'a self, url: &'a str) -> (String, SqliteArguments<'a>) {
        let mut sql = String::from("UPDATE articles SET updated_at = CURRENT_TIMESTAMP");
        let mut args = SqliteArguments::default();

        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = &self.$field {
                    sql.push_str(concat!(", ", stringify!($field), " = ?"));
                    args.add(v);
                }
            };
        }

        if let Some(v) = &self.status {
            sql.push_str(", status = ?");
            args.add(v.as_str());
        }

        set!(normalized_url);
        set!(canonical_url);
        set!(normalized_domain);
        set!(title_hash_bucket);
        set!(is_duplicate_of_article_id);
        set!(title_relevance);
        set!(title_event_type);
        set!(title_reason_short);
        set!(title_ticker_matches);
        set!(title_sector_matches);
        set!(should_fetch_full);
        set!(no_holding_mention);
        set!(likely_impact);
        set!(final_url);
        set!(clean_text);
        set!(content_length);
        set!(content_fingerprint);
        set!(content_fetched_at);
        set!(event_type);
        set!(impact_score);
        set!(sentiment);
        set!(sentiment_label);
        set!(risk_score);
        set!(opportunity_score);
        set!(volatility_score);
        set!(matched_tickers);
        set!(matched_sectors);
        set!(holding_relevance_score);
        set!(profile_adjusted_score);
        set!(profile_type_cached);
        set!(cluster_id);
        set!(is_primary_in_cluster);
        set!(final_rank_score);
        set!(importance_score);
        set!(shown_to_user);
        set!(shown_timestamp);
        set!(verdict);
        set!(why_json);
        set!(action);
        set!(horizon);
        set!(opportunity_type);
        set!(opportunity_note);
        set!(confidence);
        set!(last_error);
        set!(processing_started_at);
        set!(processing_completed_at);

        if self.clear_last_error {
            sql.push_str(", last_error = NULL");
        }
        if self.increment_fetch_attempts {
            sql.push_str(", fetch_attempts = fetch_attempts + 1");
        }
        if self.increment_llm_attempts {
            sql.push_str(", llm_attempts = llm_attempts + 1");
        }

        sql.push_str(" WHERE url = ?");
        args.add(url);

        (sql, args)
    }
}

impl ArticleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------

    /// Insert a raw article with `status=pending`. A row with the same URL
    /// already present makes this a no-op; returns whether a row was created.
    pub async fn insert(&self, article: &NewArticle) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO articles
               (url, title, description, url_to_image, content,
                source_id, source_name, author, published_at, feed_source, searched_by, status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')
               ON CONFLICT(url) DO NOTHING"#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.url_to_image)
        .bind(&article.content)
        .bind(&article.source_id)
        .bind(&article.source_name)
        .bind(&article.author)
        .bind(article.published_at)
        .bind(&article.feed_source)
        .bind(&article.searched_by)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Comma-join another search term onto an existing row, so an article
    /// shared by several holdings remembers all of them.
    pub async fn merge_searched_by(&self, url: &str, term: &str) -> Result<(), sqlx::Error> {
        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT searched_by FROM articles WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        let Some(existing) = existing else {
            return Ok(());
        };

        let merged = match existing {
            None => term.to_string(),
            Some(current) => {
                if current.split(',').any(|t| t.trim() == term) {
                    return Ok(());
                }
                format!("{},{}", current, term)
            },
        };

        sqlx::query(
            "UPDATE articles SET searched_by = ?, updated_at = CURRENT_TIMESTAMP WHERE url = ?",
        )
        .bind(&merged)
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current row for a URL (hot path).
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Article>, sqlx::Error> {
        sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
    }

    /// Batched by-URL lookup: one round trip for a whole stage batch.
    pub async fn get_by_urls(&self, urls: &[String]) -> Result<Vec<Article>, sqlx::Error> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; urls.len()].join(", ");
        let sql = format!("SELECT * FROM articles WHERE url IN ({})", placeholders);

        let mut query = sqlx::query_as::<_, Article>(&sql);
        for url in urls {
            query = query.bind(url);
        }
        query.fetch_all(&self.pool).await
    }

    /// Rows the orchestrator still owes work: pending or mid-pipeline with
    /// the next stage's output missing.
    pub async fn list_needs_processing(&self, limit: i64) -> Result<Vec<Article>, sqlx::Error> {
        sqlx::query_as::<_, Article>(
            r#"SELECT * FROM articles
               WHERE status != 'discarded'
                 AND (
                   status IN ('pending', 'title_filtered', 'fetch_failed')
                   OR (status = 'content_fetched' AND impact_score IS NULL)
                   OR (status = 'llm_processed' AND profile_adjusted_score IS NULL)
                 )
               ORDER BY published_at DESC
               LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Personalized rows that have not been ranked yet.
    pub async fn list_for_ranking(&self, limit: i64) -> Result<Vec<Article>, sqlx::Error> {
        sqlx::query_as::<_, Article>(
            r#"SELECT * FROM articles
               WHERE status = 'personalized'
                 AND (final_rank_score IS NULL OR final_rank_score = 0)
               ORDER BY profile_adjusted_score DESC
               LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Stage 5 input: all personalized rows in the deterministic clustering
    /// order (score, impact, recency, URL as the final tiebreak).
    pub async fn list_personalized_ordered(&self) -> Result<Vec<Article>, sqlx::Error> {
        sqlx::query_as::<_, Article>(
            r#"SELECT * FROM articles
               WHERE status = 'personalized'
               ORDER BY profile_adjusted_score DESC, impact_score DESC,
                        published_at DESC, url ASC"#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Dedup candidate scan: same canonical URL, same domain within the
    /// recency window, or same title bucket; only rows that could serve as a
    /// duplicate's original, i.e. rows fetched no later than the probe
    /// article (the later of two copies becomes the duplicate).
    pub async fn dedup_candidates(
        &self,
        article: &Article,
        recency_hours: i64,
        limit: i64,
    ) -> Result<Vec<Article>, sqlx::Error> {
        let cutoff = Utc::now() - Duration::hours(recency_hours);
        let fetched_at = article.content_fetched_at.unwrap_or_else(Utc::now);

        sqlx::query_as::<_, Article>(
            r#"SELECT * FROM articles
               WHERE id != ?
                 AND status IN ('content_fetched', 'llm_processed', 'personalized', 'ranked')
                 AND content_fetched_at IS NOT NULL
                 AND content_fetched_at <= ?
                 AND (
                   (canonical_url IS NOT NULL AND canonical_url = ?)
                   OR (normalized_domain IS NOT NULL AND normalized_domain = ? AND published_at >= ?)
                   OR (title_hash_bucket IS NOT NULL AND title_hash_bucket = ?)
                 )
               ORDER BY content_fetched_at ASC
               LIMIT ?"#,
        )
        .bind(article.id)
        .bind(fetched_at)
        .bind(article.canonical_url.as_deref().unwrap_or(""))
        .bind(article.normalized_domain.as_deref().unwrap_or(""))
        .bind(cutoff)
        .bind(article.title_hash_bucket.as_deref().unwrap_or(""))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Reverse lookup of an article's duplicates.
    pub async fn list_duplicates_of(&self, article_id: i64) -> Result<Vec<Article>, sqlx::Error> {
        sqlx::query_as::<_, Article>(
            "SELECT * FROM articles WHERE is_duplicate_of_article_id = ?",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Row counts per status, for the health surface.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM articles GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Apply one partial update; `updated_at` is always refreshed.
    pub async fn apply_update(
        &self,
        url: &str,
        update: &ArticleUpdate,
    ) -> Result<(), sqlx::Error> {
        let (sql, args) = update.build_sql(url);
        sqlx::query_with(&sql, args).execute(&self.pool).await?;
        Ok(())
    }

    /// Apply a batch of partial updates in a single transaction.
    pub async fn apply_updates(
        &self,
        updates: &[(String, ArticleUpdate)],
    ) -> Result<(), sqlx::Error> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (url, update) in updates {
            let (sql, args) = update.build_sql(url);
            sqlx::query_with(&sql, args).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Admin reset: remove every article row.
    pub async fn clear_all(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM articles").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

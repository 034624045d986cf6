//! Article Data Model
//!
//! The central entity of the pipeline. Each article is one row in the store,
//! uniquely keyed by its origin URL; stages attach derived fields and advance
//! `status` along the state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Article Status
// ============================================================================

/// Pipeline state of an article.
///
/// Status advances monotonically: pending → title_filtered → content_fetched
/// → llm_processed → personalized → ranked. The terminal sinks (discarded,
/// duplicate, low_priority) are reachable from any non-terminal state.
/// `fetch_failed` marks a retryable Stage 2 failure below the attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Pending,
    TitleFiltered,
    Discarded,
    LowPriority,
    FetchFailed,
    ContentFetched,
    Duplicate,
    LlmProcessed,
    Personalized,
    Ranked,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::TitleFiltered => "title_filtered",
            Self::Discarded => "discarded",
            Self::LowPriority => "low_priority",
            Self::FetchFailed => "fetch_failed",
            Self::ContentFetched => "content_fetched",
            Self::Duplicate => "duplicate",
            Self::LlmProcessed => "llm_processed",
            Self::Personalized => "personalized",
            Self::Ranked => "ranked",
        }
    }

    pub fn parse_status(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "title_filtered" => Self::TitleFiltered,
            "discarded" => Self::Discarded,
            "low_priority" => Self::LowPriority,
            "fetch_failed" => Self::FetchFailed,
            "content_fetched" => Self::ContentFetched,
            "duplicate" => Self::Duplicate,
            "llm_processed" => Self::LlmProcessed,
            "personalized" => Self::Personalized,
            "ranked" => Self::Ranked,
            _ => Self::Pending,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Discarded | Self::Duplicate)
    }

    /// Statuses a duplicate's original must have reached.
    pub fn is_dedup_original(&self) -> bool {
        matches!(
            self,
            Self::ContentFetched | Self::LlmProcessed | Self::Personalized | Self::Ranked
        )
    }
}

// ============================================================================
// Closed Enumerations
// ============================================================================

/// Closed event-type set shared by Stage 1 and Stage 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Earnings,
    #[serde(rename = "m&a")]
    MergersAndAcquisitions,
    Guidance,
    Macro,
    Regulation,
    ProductTech,
    IndustryTrend,
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earnings => "earnings",
            Self::MergersAndAcquisitions => "m&a",
            Self::Guidance => "guidance",
            Self::Macro => "macro",
            Self::Regulation => "regulation",
            Self::ProductTech => "product_tech",
            Self::IndustryTrend => "industry_trend",
            Self::Other => "other",
        }
    }

    /// Parse with a defaulted fallback; the LLM is not trusted to stay in-set.
    pub fn parse_or_other(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "earnings" => Self::Earnings,
            "m&a" | "ma" | "merger" | "acquisition" => Self::MergersAndAcquisitions,
            "guidance" => Self::Guidance,
            "macro" => Self::Macro,
            "regulation" => Self::Regulation,
            "product_tech" => Self::ProductTech,
            "industry_trend" => Self::IndustryTrend,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Negative,
    Neutral,
    Positive,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
        }
    }

    pub fn parse_or_neutral(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "negative" => Self::Negative,
            "positive" => Self::Positive,
            _ => Self::Neutral,
        }
    }

    /// Derive a label from a sentiment value in [-1, 1].
    pub fn from_score(sentiment: f64) -> Self {
        if sentiment <= -0.2 {
            Self::Negative
        } else if sentiment >= 0.2 {
            Self::Positive
        } else {
            Self::Neutral
        }
    }
}

/// User preference knob reweighting the personalization blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Focus,
    Balanced,
    Broad,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Balanced => "balanced",
            Self::Broad => "broad",
        }
    }

    pub fn parse_or_balanced(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "focus" => Self::Focus,
            "broad" => Self::Broad,
            _ => Self::Balanced,
        }
    }
}

// ============================================================================
// Article Row
// ============================================================================

/// One article row, as persisted. All derived fields are nullable until the
/// owning stage writes them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,

    // Identity
    pub url: String,
    pub normalized_url: Option<String>,
    pub canonical_url: Option<String>,
    pub normalized_domain: Option<String>,
    pub title_hash_bucket: Option<String>,
    pub is_duplicate_of_article_id: Option<i64>,

    // Origin
    pub source_name: Option<String>,
    pub source_id: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_source: Option<String>,
    pub searched_by: Option<String>,

    // Original payload
    pub title: String,
    pub description: Option<String>,
    pub url_to_image: Option<String>,
    pub content: Option<String>,

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
    pub fetch_attempts: i64,

    // Stage 3 (global, user-agnostic)
    pub event_type: Option<String>,
    pub impact_score: Option<i64>,
    pub sentiment: Option<f64>,
    pub sentiment_label: Option<String>,
    pub risk_score: Option<i64>,
    pub opportunity_score: Option<i64>,
    pub volatility_score: Option<i64>,
    pub matched_tickers: Option<String>,
    pub matched_sectors: Option<String>,

    // Stage 4 (per-profile)
    pub holding_relevance_score: Option<i64>,
    pub profile_adjusted_score: Option<f64>,
    pub profile_type_cached: Option<String>,

    // Stage 5
    pub cluster_id: Option<String>,
    pub is_primary_in_cluster: Option<bool>,
    pub final_rank_score: Option<i64>,
    pub importance_score: Option<i64>,
    pub shown_to_user: bool,
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
    pub status: String,
    pub last_error: Option<String>,
    pub llm_attempts: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn status_enum(&self) -> ArticleStatus {
        ArticleStatus::parse_status(&self.status)
    }

    /// Typed view over the `matched_tickers` JSON column.
    pub fn matched_tickers_list(&self) -> Vec<String> {
        parse_string_list(self.matched_tickers.as_deref())
    }

    /// Typed view over the `title_ticker_matches` JSON column.
    pub fn title_ticker_matches_list(&self) -> Vec<String> {
        parse_string_list(self.title_ticker_matches.as_deref())
    }

    pub fn title_sector_matches_list(&self) -> Vec<String> {
        parse_string_list(self.title_sector_matches.as_deref())
    }

    pub fn why_list(&self) -> Vec<String> {
        parse_string_list(self.why_json.as_deref())
    }

    /// MACRO vs HOLDINGS bucket; only the exact string "MACRO" is macro.
    pub fn bucket(&self) -> Bucket {
        match self.searched_by.as_deref() {
            Some(s) if s.trim().to_uppercase() == "MACRO" => Bucket::Macro,
            _ => Bucket::Holdings,
        }
    }
}

/// Coarse origin tag: searched for a specific holding vs a macro topic.
/// Determines the cost-gate threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Holdings,
    Macro,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holdings => "HOLDINGS",
            Self::Macro => "MACRO",
        }
    }
}

// ============================================================================
// Ingest Payload
// ============================================================================

/// A raw article record as delivered by a news provider, before insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub url_to_image: Option<String>,
    pub content: Option<String>,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_source: Option<String>,
    pub searched_by: Option<String>,
}

// ============================================================================
// JSON Blob Helpers
// ============================================================================

/// Parse a JSON array-of-strings column, defaulting to empty on null or
/// malformed input. JSON blobs from older rows are never trusted to parse.
pub fn parse_string_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

/// Serialize a list for a JSON blob column.
pub fn to_string_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Clamp a score into [0, 100].
pub fn clamp_score(value: i64) -> i64 {
    value.clamp(0, 100)
}

/// Clamp a sentiment into [-1, 1].
pub fn clamp_sentiment(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

/// In-memory fixture for unit tests that exercise pure stage logic.
#[cfg(test)]
pub(crate) fn test_article(url: &str, title: &str) -> Article {
    let now = chrono::Utc::now();
    Article {
        id: 1,
        url: url.to_string(),
        normalized_url: None,
        canonical_url: None,
        normalized_domain: None,
        title_hash_bucket: None,
        is_duplicate_of_article_id: None,
        source_name: None,
        source_id: None,
        author: None,
        published_at: None,
        feed_source: None,
        searched_by: None,
        title: title.to_string(),
        description: None,
        url_to_image: None,
        content: None,
        title_relevance: None,
        title_event_type: None,
        title_reason_short: None,
        title_ticker_matches: None,
        title_sector_matches: None,
        should_fetch_full: None,
        no_holding_mention: None,
        likely_impact: None,
        final_url: None,
        clean_text: None,
        content_length: None,
        content_fingerprint: None,
        content_fetched_at: None,
        fetch_attempts: 0,
        event_type: None,
        impact_score: None,
        sentiment: None,
        sentiment_label: None,
        risk_score: None,
        opportunity_score: None,
        volatility_score: None,
        matched_tickers: None,
        matched_sectors: None,
        holding_relevance_score: None,
        profile_adjusted_score: None,
        profile_type_cached: None,
        cluster_id: None,
        is_primary_in_cluster: None,
        final_rank_score: None,
        importance_score: None,
        shown_to_user: false,
        shown_timestamp: None,
        verdict: None,
        why_json: None,
        action: None,
        horizon: None,
        opportunity_type: None,
        opportunity_note: None,
        confidence: None,
        status: "pending".to_string(),
        last_error: None,
        llm_attempts: 0,
        created_at: now,
        updated_at: now,
        processing_started_at: None,
        processing_completed_at: None,
    }
}

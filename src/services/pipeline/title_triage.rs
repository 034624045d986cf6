//! Stage 1 - Title Triage
//!
//! LLM-assisted relevance scoring over titles, preceded by hard filters that
//! discard aggregator noise without spending a model call. One LLM request
//! covers a whole batch; the response is a JSON object keyed by article URL.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Thresholds;
use crate::models::article::{Article, ArticleStatus, EventType, to_string_list};
use crate::services::article_store::ArticleUpdate;
use crate::services::llm::{CompletionLimits, LlmClient, extract_json_object};
use crate::services::pipeline::stage::{
    Eligibility, PipelineStage, SkipReason, StageContext, StageOutcome,
};

const SYSTEM_PROMPT: &str = r#"You are a financial news triage assistant for a personal portfolio feed.
You receive a JSON array of article headlines. For EACH article, judge from the title and description alone:
- title_relevance: 0 (noise), 1 (marginal), 2 (relevant), 3 (highly relevant to the searched ticker/topic)
- title_event_type: one of earnings, m&a, guidance, macro, regulation, product_tech, industry_trend, other
- title_reason_short: one short sentence
- title_ticker_matches: stock tickers explicitly mentioned (array of strings)
- title_sector_matches: sectors explicitly mentioned (array of strings)
- should_fetch_full: whether the full article text is worth fetching

Respond with ONLY a JSON object keyed by article URL:
{"<url>": {"title_relevance": 2, "title_event_type": "earnings", "title_reason_short": "...", "title_ticker_matches": ["AAPL"], "title_sector_matches": [], "should_fetch_full": true}, ...}"#;

/// Fallback reason when the model gives none.
const DEFAULT_REASON: &str = "triaged by model";

/// Reason and conservative defaults applied when both the batch call and the
/// per-article retry fail.
const FALLBACK_REASON: &str = "retained after triage failure";

/// Title patterns that are never worth a model call. The matched name is
/// persisted as `title_reason_short`.
static HARD_FILTER_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)^\s*morning\s+brief", "morning_brief"),
        (r"(?i)market\s+wrap", "market_wrap"),
        (r"(?i)live\s+(blog|updates)", "live_blog"),
        (r"(?i)^\s*top\s+\d+\s+(moves|stocks|picks|trades)", "top_n_moves"),
        (r"(?i)daily\s+roundup", "daily_roundup"),
        (r"(?i)newsletter|subscribe|click\s+here", "newsletter_promo"),
        (r"(?i)^\s*(video|podcast|slideshow|photo\s+gallery|photos)\s*:", "media_format"),
    ]
    .iter()
    .map(|(pattern, name)| (Regex::new(pattern).expect("static pattern"), *name))
    .collect()
});

/// Source markers of paid placement.
const SPONSORED_MARKERS: &[&str] = &["sponsored", "advertisement", "promoted", "partner content"];

/// Check an article against the pre-LLM hard filters. Returns the name of the
/// matching filter, or `None` when the article survives.
pub fn hard_filter_reason(article: &Article) -> Option<&'static str> {
    for (pattern, name) in HARD_FILTER_PATTERNS.iter() {
        if pattern.is_match(&article.title) {
            return Some(name);
        }
    }

    if article.title.trim().chars().count() < 10 {
        return Some("title_too_short");
    }

    let has_meaningful_word = article
        .title
        .split_whitespace()
        .any(|w| w.chars().filter(|c| c.is_alphabetic()).count() > 3);
    if !has_meaningful_word {
        return Some("no_meaningful_words");
    }

    if let Some(source) = &article.source_name {
        let lower = source.to_lowercase();
        if SPONSORED_MARKERS.iter().any(|m| lower.contains(m)) {
            return Some("sponsored_source");
        }
    }

    None
}

/// True when the article was searched for a holding but neither title nor
/// description mentions any of the user's tickers or issuer labels.
pub fn lacks_holding_mention(
    article: &Article,
    holdings: &[crate::models::holding::Holding],
) -> bool {
    let Some(searched_by) = &article.searched_by else {
        return false;
    };

    let searched_terms: Vec<String> = searched_by
        .split(',')
        .map(|t| crate::models::holding::normalize_ticker(t))
        .collect();
    let searched_is_holding = holdings
        .iter()
        .any(|h| searched_terms.contains(&crate::models::holding::normalize_ticker(&h.ticker)));
    if !searched_is_holding {
        return false;
    }

    let haystack = format!(
        "{} {}",
        article.title,
        article.description.as_deref().unwrap_or("")
    )
    .to_uppercase();

    let mentioned = holdings.iter().any(|h| {
        let ticker = crate::models::holding::normalize_ticker(&h.ticker);
        if !ticker.is_empty() && haystack.contains(&ticker) {
            return true;
        }
        match &h.label {
            Some(label) if label.len() > 3 => haystack.contains(&label.to_uppercase()),
            _ => false,
        }
    });

    !mentioned
}

/// One article's triage verdict after parsing and sanitization.
#[derive(Debug, Clone)]
struct TriageResult {
    relevance: i64,
    event_type: EventType,
    reason: String,
    tickers: Vec<String>,
    sectors: Vec<String>,
    should_fetch: bool,
}

impl TriageResult {
    fn fallback() -> Self {
        Self {
            relevance: 2,
            event_type: EventType::Other,
            reason: FALLBACK_REASON.to_string(),
            tickers: Vec::new(),
            sectors: Vec::new(),
            should_fetch: true,
        }
    }

    fn status(&self) -> ArticleStatus {
        if self.relevance == 0 {
            ArticleStatus::Discarded
        } else {
            ArticleStatus::TitleFiltered
        }
    }

    fn into_update(self, no_holding_mention: Option<bool>) -> ArticleUpdate {
        ArticleUpdate {
            status: Some(self.status()),
            title_relevance: Some(self.relevance),
            title_event_type: Some(self.event_type.as_str().to_string()),
            title_reason_short: Some(self.reason),
            title_ticker_matches: Some(to_string_list(&self.tickers)),
            title_sector_matches: Some(to_string_list(&self.sectors)),
            should_fetch_full: Some(self.should_fetch),
            no_holding_mention,
            ..ArticleUpdate::default()
        }
    }
}

fn parse_triage_entry(value: &serde_json::Value) -> TriageResult {
    let relevance = value
        .get("title_relevance")
        .and_then(|v| v.as_i64())
        .unwrap_or(1)
        .clamp(0, 3);

    let event_type = value
        .get("title_event_type")
        .and_then(|v| v.as_str())
        .map(EventType::parse_or_other)
        .unwrap_or(EventType::Other);

    let reason = value
        .get("title_reason_short")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_REASON.to_string());

    let string_array = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };
    let tickers = string_array("title_ticker_matches");
    let sectors = string_array("title_sector_matches");

    let should_fetch = value
        .get("should_fetch_full")
        .and_then(|v| v.as_bool())
        .unwrap_or(relevance >= 2);

    TriageResult { relevance, event_type, reason, tickers, sectors, should_fetch }
}

pub struct TitleTriageStage {
    llm: Arc<dyn LlmClient>,
    thresholds: Thresholds,
}

impl TitleTriageStage {
    pub fn new(llm: Arc<dyn LlmClient>, thresholds: Thresholds) -> Self {
        Self { llm, thresholds }
    }

    fn limits_for(batch_len: usize) -> CompletionLimits {
        let n = batch_len as u64;
        let timeout_secs = (45 + 2 * n).clamp(45, 120);
        let max_tokens = (400 * batch_len as u32).min(6000);
        CompletionLimits::new(max_tokens, Duration::from_secs(timeout_secs))
    }

    fn user_prompt(articles: &[&Article]) -> String {
        let entries: Vec<serde_json::Value> = articles
            .iter()
            .map(|a| {
                json!({
                    "url": a.url,
                    "title": a.title,
                    "description": a.description,
                    "searched_by": a.searched_by,
                })
            })
            .collect();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// One LLM call for a set of articles; returns per-URL results.
    async fn triage_with_llm(
        &self,
        articles: &[&Article],
    ) -> Result<Vec<TriageResult>, crate::services::llm::LlmError> {
        let limits = Self::limits_for(articles.len());
        let content = self
            .llm
            .complete(SYSTEM_PROMPT, &Self::user_prompt(articles), &limits)
            .await?;
        let parsed = extract_json_object(&content)?;

        Ok(articles
            .iter()
            .map(|a| {
                parsed
                    .get(&a.url)
                    .map(parse_triage_entry)
                    .unwrap_or_else(TriageResult::fallback)
            })
            .collect())
    }

    /// Batch call, then per-article retries, then conservative defaults.
    async fn triage_with_fallback(&self, articles: &[&Article]) -> Vec<TriageResult> {
        match self.triage_with_llm(articles).await {
            Ok(results) => results,
            Err(batch_err) => {
                tracing::warn!(
                    "Title triage batch call failed ({}), falling back to per-article mode",
                    batch_err
                );
                let mut results = Vec::with_capacity(articles.len());
                for article in articles {
                    let single = [*article];
                    match self.triage_with_llm(&single).await {
                        Ok(mut r) => results.push(r.remove(0)),
                        Err(e) => {
                            tracing::warn!(
                                "Per-article triage failed for {}: {}",
                                article.url,
                                e
                            );
                            results.push(TriageResult::fallback());
                        },
                    }
                }
                results
            },
        }
    }
}

#[async_trait]
impl PipelineStage for TitleTriageStage {
    fn name(&self) -> &'static str {
        "title_triage"
    }

    fn batch_size(&self) -> usize {
        self.thresholds.stage1_batch_size
    }

    fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.thresholds.delay_between_batches_ms)
    }

    fn check_prerequisites(&self, row: Option<&Article>, _ctx: &StageContext) -> Eligibility {
        let Some(row) = row else {
            return Eligibility::Skip(SkipReason::NotFound);
        };
        if row.title_relevance.is_some() {
            return Eligibility::Skip(SkipReason::AlreadyProcessed);
        }
        if row.status_enum().is_terminal() {
            return Eligibility::Skip(SkipReason::Terminal);
        }
        if row.status_enum() != ArticleStatus::Pending {
            return Eligibility::Skip(SkipReason::WrongStatus);
        }
        Eligibility::Eligible
    }

    async fn process_batch(
        &self,
        rows: Vec<Article>,
        ctx: &StageContext,
    ) -> anyhow::Result<Vec<StageOutcome>> {
        let mut outcomes = Vec::with_capacity(rows.len());
        let mut updates: Vec<(String, ArticleUpdate)> = Vec::with_capacity(rows.len());
        let mut survivors: Vec<&Article> = Vec::new();

        for row in &rows {
            if let Some(reason) = hard_filter_reason(row) {
                updates.push((
                    row.url.clone(),
                    ArticleUpdate {
                        status: Some(ArticleStatus::Discarded),
                        title_relevance: Some(0),
                        title_reason_short: Some(reason.to_string()),
                        should_fetch_full: Some(false),
                        ..ArticleUpdate::default()
                    },
                ));
                outcomes.push(StageOutcome::advanced(&row.url, ArticleStatus::Discarded));
            } else {
                survivors.push(row);
            }
        }

        if !survivors.is_empty() {
            let results = self.triage_with_fallback(&survivors).await;

            for (article, result) in survivors.iter().zip(results) {
                // Non-destructive: the article continues to scoring even when
                // the searched holding is not mentioned in the headline.
                let flag = lacks_holding_mention(article, &ctx.holdings).then_some(true);
                let status = result.status();
                updates.push((article.url.clone(), result.into_update(flag)));
                outcomes.push(StageOutcome::advanced(&article.url, status));
            }
        }

        ctx.store.apply_updates(&updates).await?;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::article::test_article;
    use chrono::Utc;

    fn article_with_title(title: &str) -> Article {
        let mut article = test_article("https://site/a", title);
        article.source_name = Some("CNBC".to_string());
        article.searched_by = Some("NVDA".to_string());
        article
    }

    #[test]
    fn hard_filters_catch_generic_patterns() {
        assert_eq!(
            hard_filter_reason(&article_with_title("Morning Brief — Markets Today")),
            Some("morning_brief")
        );
        assert_eq!(
            hard_filter_reason(&article_with_title("Top 5 moves to make before the open")),
            Some("top_n_moves")
        );
        assert_eq!(
            hard_filter_reason(&article_with_title("Video: CEO interview highlights")),
            Some("media_format")
        );
        assert_eq!(
            hard_filter_reason(&article_with_title("Subscribe to our daily newsletter")),
            Some("newsletter_promo")
        );
    }

    #[test]
    fn quality_gate_catches_short_and_meaningless_titles() {
        assert_eq!(hard_filter_reason(&article_with_title("Oops")), Some("title_too_short"));
        assert_eq!(
            hard_filter_reason(&article_with_title("a b c d e f g h i j")),
            Some("no_meaningful_words")
        );
    }

    #[test]
    fn exactly_ten_chars_passes_length_gate() {
        // 10 chars, one meaningful word
        let article = article_with_title("Earnings!!");
        assert_eq!(hard_filter_reason(&article), None);
    }

    #[test]
    fn sponsored_source_is_filtered() {
        let mut article = article_with_title("Company posts strong quarterly results");
        article.source_name = Some("Sponsored Content Desk".to_string());
        assert_eq!(hard_filter_reason(&article), Some("sponsored_source"));
    }

    #[test]
    fn normal_headline_survives() {
        let article = article_with_title("Nvidia beats earnings expectations on data center demand");
        assert_eq!(hard_filter_reason(&article), None);
    }

    #[test]
    fn holding_mention_flag() {
        use crate::models::holding::Holding;
        let holding = Holding {
            id: 1,
            user_id: 1,
            ticker: "NVDA".to_string(),
            label: Some("Nvidia".to_string()),
            notes: None,
            created_at: Utc::now(),
        };

        let mentioned = article_with_title("NVDA rallies after earnings beat");
        assert!(!lacks_holding_mention(&mentioned, &[holding.clone()]));

        let by_label = article_with_title("Nvidia rallies after earnings beat");
        assert!(!lacks_holding_mention(&by_label, &[holding.clone()]));

        let unmentioned = article_with_title("Chip sector rallies broadly on AI demand");
        assert!(lacks_holding_mention(&unmentioned, &[holding]));
    }

    #[test]
    fn parse_entry_clamps_and_defaults() {
        let value = json!({
            "title_relevance": 9,
            "title_event_type": "weird",
            "title_ticker_matches": ["aapl", " msft "],
            "should_fetch_full": false
        });
        let result = parse_triage_entry(&value);
        assert_eq!(result.relevance, 3);
        assert_eq!(result.event_type, EventType::Other);
        assert_eq!(result.reason, DEFAULT_REASON);
        assert_eq!(result.tickers, vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert!(!result.should_fetch);
    }

    #[test]
    fn zero_relevance_derives_discarded() {
        let value = json!({"title_relevance": 0});
        assert_eq!(parse_triage_entry(&value).status(), ArticleStatus::Discarded);
        let value = json!({"title_relevance": 2});
        assert_eq!(parse_triage_entry(&value).status(), ArticleStatus::TitleFiltered);
    }

    #[test]
    fn limits_scale_with_batch_size() {
        let small = TitleTriageStage::limits_for(1);
        assert_eq!(small.timeout.as_secs(), 47);
        assert_eq!(small.max_tokens, 400);

        let large = TitleTriageStage::limits_for(20);
        assert_eq!(large.timeout.as_secs(), 85);
        assert_eq!(large.max_tokens, 6000);

        let huge = TitleTriageStage::limits_for(60);
        assert_eq!(huge.timeout.as_secs(), 120);
        assert_eq!(huge.max_tokens, 6000);
    }
}

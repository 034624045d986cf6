//! Stage 3 - Content Classification
//!
//! Strictly global and user-agnostic: the outputs describe the article, not
//! any portfolio. Two LLM passes keep cost down: a cheap relevance/impact
//! bucket pass over short excerpts, then full analysis only for the
//! medium/high survivors.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Thresholds;
use crate::models::article::{
    Article, ArticleStatus, EventType, SentimentLabel, clamp_score, clamp_sentiment,
    to_string_list,
};
use crate::services::article_store::ArticleUpdate;
use crate::services::llm::{CompletionLimits, LlmClient, LlmError, extract_json_object};
use crate::services::pipeline::stage::{
    Eligibility, PipelineStage, SkipReason, StageContext, StageOutcome,
};
use crate::utils::truncate_chars;

const PASS1_SYSTEM: &str = r#"You are a fast financial news screener.
You receive a JSON array of article excerpts. For EACH article decide:
- maybe_relevant: could this plausibly matter to an investor's portfolio?
- impact_bucket: "low", "medium" or "high" expected market impact.

Respond with ONLY a JSON object keyed by article URL:
{"<url>": {"maybe_relevant": true, "impact_bucket": "medium"}, ...}"#;

const PASS2_SYSTEM: &str = r#"You are a financial news analyst. You receive a JSON array of article excerpts.
For EACH article produce a global, portfolio-independent assessment:
- event_type: one of earnings, m&a, guidance, macro, regulation, product_tech, industry_trend, other
- impact_score: 0-100 expected market impact
- sentiment: -1.0 to 1.0
- sentiment_label: negative | neutral | positive
- risk_score, opportunity_score, volatility_score: 0-100
- matched_tickers: tickers the article is about (array of strings)
- matched_sectors: sectors the article is about (array of strings)

Respond with ONLY a JSON object keyed by article URL."#;

/// Impact written to rows the cheap pass screens out.
const SCREENED_OUT_IMPACT: i64 = 15;

/// Head-plus-tail excerpt: the whole text when it fits the limit, otherwise
/// the first and last `part` characters around an elision marker.
pub fn intro_conclusion_excerpt(text: &str, limit: usize, part: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }
    let head: String = chars[..part].iter().collect();
    let tail: String = chars[chars.len() - part..].iter().collect();
    format!("{}\n[...content...]\n{}", head, tail)
}

/// Sanitized Stage 3 output for one article.
#[derive(Debug, Clone)]
struct ClassificationResult {
    event_type: EventType,
    impact_score: i64,
    sentiment: f64,
    sentiment_label: SentimentLabel,
    risk_score: i64,
    opportunity_score: i64,
    volatility_score: i64,
    tickers: Vec<String>,
    sectors: Vec<String>,
}

impl ClassificationResult {
    fn status(&self, thresholds: &Thresholds) -> ArticleStatus {
        if self.impact_score >= thresholds.stage3_min_impact {
            ArticleStatus::LlmProcessed
        } else {
            ArticleStatus::Discarded
        }
    }

    fn into_update(self, status: ArticleStatus) -> ArticleUpdate {
        ArticleUpdate {
            status: Some(status),
            event_type: Some(self.event_type.as_str().to_string()),
            impact_score: Some(self.impact_score),
            sentiment: Some(self.sentiment),
            sentiment_label: Some(self.sentiment_label.as_str().to_string()),
            risk_score: Some(self.risk_score),
            opportunity_score: Some(self.opportunity_score),
            volatility_score: Some(self.volatility_score),
            matched_tickers: Some(to_string_list(&self.tickers)),
            matched_sectors: Some(to_string_list(&self.sectors)),
            clear_last_error: true,
            ..ArticleUpdate::default()
        }
    }
}

fn parse_classification_entry(value: &serde_json::Value) -> ClassificationResult {
    let score = |key: &str| -> i64 {
        clamp_score(value.get(key).and_then(|v| v.as_i64()).unwrap_or(0))
    };

    let sentiment = clamp_sentiment(
        value.get("sentiment").and_then(|v| v.as_f64()).unwrap_or(0.0),
    );
    let sentiment_label = value
        .get("sentiment_label")
        .and_then(|v| v.as_str())
        .map(SentimentLabel::parse_or_neutral)
        .unwrap_or_else(|| SentimentLabel::from_score(sentiment));

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

    ClassificationResult {
        event_type: value
            .get("event_type")
            .and_then(|v| v.as_str())
            .map(EventType::parse_or_other)
            .unwrap_or(EventType::Other),
        impact_score: score("impact_score"),
        sentiment,
        sentiment_label,
        risk_score: score("risk_score"),
        opportunity_score: score("opportunity_score"),
        volatility_score: score("volatility_score"),
        tickers: string_array("matched_tickers"),
        // Sectors are free text but kept upper-cased like tickers.
        sectors: string_array("matched_sectors"),
    }
}

pub struct ClassifyStage {
    llm: Arc<dyn LlmClient>,
    thresholds: Thresholds,
}

impl ClassifyStage {
    pub fn new(llm: Arc<dyn LlmClient>, thresholds: Thresholds) -> Self {
        Self { llm, thresholds }
    }

    fn limits_for(batch_len: usize) -> CompletionLimits {
        let n = batch_len as u64;
        let timeout_secs = (45 + 2 * n).clamp(45, 120);
        let max_tokens = (500 * batch_len as u32).min(6000);
        CompletionLimits::new(max_tokens, Duration::from_secs(timeout_secs))
    }

    fn excerpt_prompt(articles: &[&Article], limit: usize, part: usize) -> String {
        let entries: Vec<serde_json::Value> = articles
            .iter()
            .map(|a| {
                json!({
                    "url": a.url,
                    "title": a.title,
                    "text": intro_conclusion_excerpt(
                        a.clean_text.as_deref().unwrap_or(""),
                        limit,
                        part,
                    ),
                })
            })
            .collect();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Cheap pass: which articles survive to full analysis. Missing entries
    /// are treated as medium so a partial response never drops articles.
    async fn pass1_survivors<'a>(
        &self,
        articles: &[&'a Article],
    ) -> Result<(Vec<&'a Article>, Vec<&'a Article>), LlmError> {
        let prompt = Self::excerpt_prompt(articles, 800, 600);
        let content = self
            .llm
            .complete(PASS1_SYSTEM, &prompt, &Self::limits_for(articles.len()))
            .await?;
        let parsed = extract_json_object(&content)?;

        let mut survivors = Vec::new();
        let mut screened_out = Vec::new();
        for article in articles {
            let entry = parsed.get(&article.url);
            let maybe_relevant = entry
                .and_then(|e| e.get("maybe_relevant"))
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            let bucket = entry
                .and_then(|e| e.get("impact_bucket"))
                .and_then(|v| v.as_str())
                .unwrap_or("medium")
                .to_lowercase();

            if !maybe_relevant || bucket == "low" {
                screened_out.push(*article);
            } else {
                survivors.push(*article);
            }
        }
        Ok((survivors, screened_out))
    }

    async fn pass2_classify(
        &self,
        articles: &[&Article],
    ) -> Result<serde_json::Value, LlmError> {
        let prompt = Self::excerpt_prompt(articles, 1800, 900);
        let content = self
            .llm
            .complete(PASS2_SYSTEM, &prompt, &Self::limits_for(articles.len()))
            .await?;
        extract_json_object(&content)
    }

    async fn classify_individual(
        &self,
        article: &Article,
    ) -> Result<ClassificationResult, LlmError> {
        let parsed = self.pass2_classify(&[article]).await?;
        let entry = parsed.get(&article.url).ok_or_else(|| {
            LlmError::ParseError(format!("no entry for {} in individual response", article.url))
        })?;
        Ok(parse_classification_entry(entry))
    }

    fn failure_update(error: &str) -> ArticleUpdate {
        ArticleUpdate {
            increment_llm_attempts: true,
            last_error: Some(truncate_chars(error, 500)),
            ..ArticleUpdate::default()
        }
    }
}

#[async_trait]
impl PipelineStage for ClassifyStage {
    fn name(&self) -> &'static str {
        "classify"
    }

    fn batch_size(&self) -> usize {
        self.thresholds.stage3_batch_size
    }

    fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.thresholds.delay_between_batches_ms)
    }

    fn check_prerequisites(&self, row: Option<&Article>, _ctx: &StageContext) -> Eligibility {
        let Some(row) = row else {
            return Eligibility::Skip(SkipReason::NotFound);
        };
        if row.status_enum().is_terminal() {
            return Eligibility::Skip(SkipReason::Terminal);
        }
        if row.impact_score.is_some() {
            return Eligibility::Skip(SkipReason::AlreadyProcessed);
        }
        if row.status_enum() != ArticleStatus::ContentFetched {
            return Eligibility::Skip(SkipReason::WrongStatus);
        }
        if row.clean_text.is_none() {
            return Eligibility::Skip(SkipReason::MissingPrerequisite);
        }
        Eligibility::Eligible
    }

    async fn process_batch(
        &self,
        rows: Vec<Article>,
        ctx: &StageContext,
    ) -> anyhow::Result<Vec<StageOutcome>> {
        let mut outcomes = Vec::with_capacity(rows.len());
        let mut updates: Vec<(String, ArticleUpdate)> = Vec::new();
        let mut eligible: Vec<&Article> = Vec::new();

        for row in &rows {
            if row.content_length.unwrap_or(0) < self.thresholds.content_min_length {
                updates.push((row.url.clone(), ArticleUpdate::status(ArticleStatus::Discarded)));
                outcomes.push(StageOutcome::advanced(&row.url, ArticleStatus::Discarded));
            } else {
                eligible.push(row);
            }
        }

        if eligible.is_empty() {
            ctx.store.apply_updates(&updates).await?;
            return Ok(outcomes);
        }

        // Pass 1: cheap screen. A batch failure here sends the whole batch
        // to the per-article fallback.
        let mut fallback_articles: Vec<&Article> = Vec::new();
        let (survivors, screened_out) = match self.pass1_survivors(&eligible).await {
            Ok(split) => split,
            Err(e) => {
                tracing::warn!("Classification pass 1 failed ({}), using per-article mode", e);
                fallback_articles = eligible.clone();
                (Vec::new(), Vec::new())
            },
        };

        for article in &screened_out {
            updates.push((
                article.url.clone(),
                ArticleUpdate {
                    status: Some(ArticleStatus::Discarded),
                    impact_score: Some(SCREENED_OUT_IMPACT),
                    event_type: Some(EventType::Other.as_str().to_string()),
                    matched_tickers: Some("[]".to_string()),
                    matched_sectors: Some("[]".to_string()),
                    ..ArticleUpdate::default()
                },
            ));
            outcomes.push(StageOutcome::advanced(&article.url, ArticleStatus::Discarded));
        }

        // Pass 2: full analysis over the medium/high survivors.
        if !survivors.is_empty() {
            match self.pass2_classify(&survivors).await {
                Ok(parsed) => {
                    for article in &survivors {
                        match parsed.get(&article.url) {
                            Some(entry) => {
                                let result = parse_classification_entry(entry);
                                let status = result.status(&self.thresholds);
                                updates.push((article.url.clone(), result.into_update(status)));
                                outcomes.push(StageOutcome::advanced(&article.url, status));
                            },
                            None => fallback_articles.push(*article),
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "Classification pass 2 failed ({}), using per-article mode",
                        e
                    );
                    fallback_articles.extend(survivors.iter().copied());
                },
            }
        }

        // Per-article fallback: one call each; a second failure leaves the
        // row unchanged apart from the error bookkeeping.
        for article in fallback_articles {
            match self.classify_individual(article).await {
                Ok(result) => {
                    let status = result.status(&self.thresholds);
                    updates.push((article.url.clone(), result.into_update(status)));
                    outcomes.push(StageOutcome::advanced(&article.url, status));
                },
                Err(e) => {
                    updates.push((article.url.clone(), Self::failure_update(&e.to_string())));
                    outcomes.push(StageOutcome::failed(&article.url, e.to_string()));
                },
            }
        }

        ctx.store.apply_updates(&updates).await?;
        Ok(outcomes)
    }
}

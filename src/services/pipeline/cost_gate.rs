//! Stage 1.5 - Cost Gate
//!
//! A cheap heuristic over the Stage 1 outputs that decides whether the
//! article earns a full content fetch. This gate overrides Stage 1's
//! `should_fetch_full`: its verdict is the final fetch decision.

use async_trait::async_trait;

use crate::config::Thresholds;
use crate::models::article::{Article, ArticleStatus, Bucket};
use crate::services::article_store::ArticleUpdate;
use crate::services::pipeline::stage::{
    Eligibility, PipelineStage, SkipReason, StageContext, StageOutcome,
};

/// Event tags that bump `likely_impact` by 20. A substring match against
/// `title_event_type` counts.
const HIGH_IMPACT_TAGS: &[&str] = &[
    "earnings",
    "merger",
    "acquisition",
    "m&a",
    "ipo",
    "bankruptcy",
    "lawsuit",
    "regulation",
    "macro",
    "guidance",
];

/// Sources that earn the +5 reputation bump.
const REPUTABLE_SOURCES: &[&str] =
    &["reuters", "bloomberg", "wsj", "financial times", "cnbc", "marketwatch"];

/// Heuristic impact estimate in [0, 100] from the title-triage outputs.
pub fn likely_impact(article: &Article) -> i64 {
    let mut score = 10 * article.title_relevance.unwrap_or(0);

    if let Some(event) = &article.title_event_type {
        let event = event.to_lowercase();
        if HIGH_IMPACT_TAGS.iter().any(|tag| event.contains(tag)) {
            score += 20;
        }
    }

    if !article.title_ticker_matches_list().is_empty()
        || !article.title_sector_matches_list().is_empty()
    {
        score += 10;
    }

    if let Some(source) = &article.source_name {
        let source = source.to_lowercase();
        if REPUTABLE_SOURCES.iter().any(|s| source.contains(s)) {
            score += 5;
        }
    }

    score.min(100)
}

/// Gate threshold for the article's bucket.
pub fn gate_threshold(bucket: Bucket, thresholds: &Thresholds) -> i64 {
    match bucket {
        Bucket::Holdings => thresholds.process_gate_holdings,
        Bucket::Macro => thresholds.process_gate_macro,
    }
}

pub struct CostGateStage {
    thresholds: Thresholds,
}

impl CostGateStage {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl PipelineStage for CostGateStage {
    fn name(&self) -> &'static str {
        "cost_gate"
    }

    fn check_prerequisites(&self, row: Option<&Article>, _ctx: &StageContext) -> Eligibility {
        let Some(row) = row else {
            return Eligibility::Skip(SkipReason::NotFound);
        };
        if row.status_enum().is_terminal() {
            return Eligibility::Skip(SkipReason::Terminal);
        }
        if row.likely_impact.is_some() {
            return Eligibility::Skip(SkipReason::AlreadyProcessed);
        }
        if row.status_enum() != ArticleStatus::TitleFiltered {
            return Eligibility::Skip(SkipReason::WrongStatus);
        }
        if row.title_relevance.is_none() {
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
        let mut updates = Vec::with_capacity(rows.len());

        for row in &rows {
            let impact = likely_impact(row);
            let threshold = gate_threshold(row.bucket(), &self.thresholds);
            let proceed = impact >= threshold;

            let (status, fetch) = if proceed {
                (ArticleStatus::TitleFiltered, true)
            } else {
                // Not discarded: low-priority rows stay eligible for later
                // re-evaluation policies.
                (ArticleStatus::LowPriority, false)
            };

            updates.push((
                row.url.clone(),
                ArticleUpdate {
                    status: Some(status),
                    likely_impact: Some(impact),
                    should_fetch_full: Some(fetch),
                    ..ArticleUpdate::default()
                },
            ));
            outcomes.push(StageOutcome::advanced(&row.url, status));
        }

        ctx.store.apply_updates(&updates).await?;
        Ok(outcomes)
    }
}

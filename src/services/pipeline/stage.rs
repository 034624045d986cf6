//! Stage Processor
//!
//! The generic per-stage driver: one batched row lookup, in-memory
//! prerequisite checks, bounded-vocabulary skip accounting, chunked
//! processing with inter-batch pauses, and per-batch error containment.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::models::article::{Article, ArticleStatus, Profile};
use crate::models::holding::Holding;
use crate::services::article_store::ArticleStore;

/// Everything a stage can consult besides the article rows themselves.
pub struct StageContext {
    pub store: Arc<ArticleStore>,
    pub holdings: Vec<Holding>,
    pub profile: Profile,
}

/// Why an article was skipped by a stage. Closed vocabulary so reports can
/// be aggregated without string drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No row exists for the URL at stage time.
    NotFound,
    /// Current status disqualifies the article from this stage.
    WrongStatus,
    /// The stage's output is already present.
    AlreadyProcessed,
    /// A required upstream field is missing.
    MissingPrerequisite,
    /// The article reached a terminal status.
    Terminal,
    /// The cost gate decided against fetching this article.
    NotSelectedForFetch,
    /// Fetch attempt cap reached.
    AttemptsExhausted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::WrongStatus => "wrong_status",
            Self::AlreadyProcessed => "already_processed",
            Self::MissingPrerequisite => "missing_prerequisite",
            Self::Terminal => "terminal",
            Self::NotSelectedForFetch => "not_selected_for_fetch",
            Self::AttemptsExhausted => "attempts_exhausted",
        }
    }
}

/// Prerequisite check result.
pub enum Eligibility {
    Eligible,
    Skip(SkipReason),
}

/// What happened to one article in a stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The stage ran and left the article at this status.
    Advanced(ArticleStatus),
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub url: String,
    pub disposition: Disposition,
}

impl StageOutcome {
    pub fn advanced(url: impl Into<String>, status: ArticleStatus) -> Self {
        Self { url: url.into(), disposition: Disposition::Advanced(status) }
    }

    pub fn failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self { url: url.into(), disposition: Disposition::Failed(message.into()) }
    }
}

/// Aggregated result of one stage run.
#[derive(Debug, Default, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub processed: usize,
    pub failed: usize,
    pub skip_reasons: BTreeMap<&'static str, usize>,
    pub outcomes: Vec<StageOutcome>,
    /// Set when a per-batch fatal error aborted the stage; `outcomes` holds
    /// the partial results produced before the abort.
    pub aborted: Option<String>,
}

impl StageReport {
    fn record(&mut self, outcome: StageOutcome) {
        match &outcome.disposition {
            Disposition::Advanced(_) => self.processed += 1,
            Disposition::Failed(_) => self.failed += 1,
            Disposition::Skipped(reason) => {
                *self.skip_reasons.entry(reason.as_str()).or_insert(0) += 1;
            },
        }
        self.outcomes.push(outcome);
    }
}

/// One pipeline stage: a prerequisite predicate plus a batch processor.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Maximum articles per `process_batch` call.
    fn batch_size(&self) -> usize {
        1
    }

    /// Pause between consecutive batches (rate-limit courtesy).
    fn delay_between_batches(&self) -> Duration {
        Duration::ZERO
    }

    /// Decide eligibility from the persisted row. Must not touch the store;
    /// the driver has already fetched the rows in one round trip.
    fn check_prerequisites(&self, row: Option<&Article>, ctx: &StageContext) -> Eligibility;

    /// Process one batch of eligible rows. Returning `Err` signals a
    /// per-batch fatal error (e.g. store unavailable) and aborts the stage;
    /// per-article problems must be reported as `Failed` outcomes instead.
    async fn process_batch(
        &self,
        rows: Vec<Article>,
        ctx: &StageContext,
    ) -> anyhow::Result<Vec<StageOutcome>>;
}

/// Drive one stage over a set of URLs.
///
/// Rows are fetched in a single batched lookup; prerequisite checks run
/// against those in-memory rows (no N+1). Results preserve input order
/// within each batch.
pub async fn run_stage(
    stage: &dyn PipelineStage,
    ctx: &StageContext,
    urls: &[String],
) -> StageReport {
    let mut report = StageReport { stage: stage.name(), ..StageReport::default() };

    let rows = match ctx.store.get_by_urls(urls).await {
        Ok(rows) => rows,
        Err(e) => {
            report.aborted = Some(format!("batched row lookup failed: {}", e));
            return report;
        },
    };
    let mut by_url: HashMap<String, Article> =
        rows.into_iter().map(|a| (a.url.clone(), a)).collect();

    let mut eligible = Vec::new();
    for url in urls {
        match stage.check_prerequisites(by_url.get(url.as_str()), ctx) {
            Eligibility::Eligible => {
                if let Some(row) = by_url.remove(url.as_str()) {
                    eligible.push(row);
                }
            },
            Eligibility::Skip(reason) => {
                report.record(StageOutcome {
                    url: url.clone(),
                    disposition: Disposition::Skipped(reason),
                });
            },
        }
    }

    if eligible.is_empty() {
        return report;
    }

    let batch_size = stage.batch_size().max(1);
    let batches: Vec<Vec<Article>> = eligible
        .chunks(batch_size)
        .map(|c| c.to_vec())
        .collect();
    let batch_count = batches.len();

    for (i, batch) in batches.into_iter().enumerate() {
        match stage.process_batch(batch, ctx).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    report.record(outcome);
                }
            },
            Err(e) => {
                tracing::error!("Stage '{}' batch {} aborted: {}", stage.name(), i + 1, e);
                report.aborted = Some(e.to_string());
                return report;
            },
        }

        if i + 1 < batch_count {
            let delay = stage.delay_between_batches();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    tracing::debug!(
        "Stage '{}': {} processed, {} failed, skips {:?}",
        stage.name(),
        report.processed,
        report.failed,
        report.skip_reasons
    );

    report
}

//! Article Processing Pipeline
//!
//! The staged processor that turns raw ingested articles into a ranked,
//! personalized feed. Stages run in a fixed order over a batch of URLs;
//! every stage re-checks its prerequisites against the persisted row, so
//! re-running a batch is idempotent and an interrupted run resumes where it
//! stopped.
//!
//! ```text
//! pending → title_triage → cost_gate → content_fetch → dedup
//!         → classify → personalize      (per-article, this module)
//! personalized → rank                   (store-wide batch step)
//! ```

pub mod classify;
pub mod content_fetch;
pub mod cost_gate;
pub mod dedup;
pub mod extract;
pub mod fingerprint;
pub mod guardrail;
pub mod personalize;
pub mod rank;
pub mod stage;
pub mod title_triage;
pub mod url_norm;

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Thresholds;
use crate::models::article::Profile;
use crate::models::holding::Holding;
use crate::services::article_store::ArticleStore;
use crate::services::fetcher::{ContentFetcher, RedirectResolver};
use crate::services::llm::LlmClient;

use self::classify::ClassifyStage;
use self::content_fetch::ContentFetchStage;
use self::cost_gate::CostGateStage;
use self::dedup::DedupStage;
use self::personalize::PersonalizeStage;
use self::rank::{RankingReport, RankingStage};
use self::stage::{PipelineStage, StageContext, StageReport, run_stage};
use self::title_triage::TitleTriageStage;

/// Per-stage results for one orchestrated batch.
#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
    pub articles: usize,
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    /// True when some stage hit a per-batch fatal error.
    pub fn aborted(&self) -> bool {
        self.stages.iter().any(|s| s.aborted.is_some())
    }
}

/// The pipeline orchestrator: owns the stage wiring and the shared
/// capabilities (store, LLM, fetcher).
pub struct Pipeline {
    store: Arc<ArticleStore>,
    llm: Arc<dyn LlmClient>,
    fetcher: Arc<dyn ContentFetcher>,
    resolver: Arc<dyn RedirectResolver>,
    thresholds: Thresholds,
    incremental_top_n: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<ArticleStore>,
        llm: Arc<dyn LlmClient>,
        fetcher: Arc<dyn ContentFetcher>,
        resolver: Arc<dyn RedirectResolver>,
        thresholds: Thresholds,
        incremental_top_n: usize,
    ) -> Self {
        Self { store, llm, fetcher, resolver, thresholds, incremental_top_n }
    }

    pub fn store(&self) -> &Arc<ArticleStore> {
        &self.store
    }

    fn context(&self, holdings: Vec<Holding>, profile: Profile) -> StageContext {
        StageContext { store: Arc::clone(&self.store), holdings, profile }
    }

    fn stages(&self) -> Vec<Box<dyn PipelineStage>> {
        vec![
            Box::new(TitleTriageStage::new(Arc::clone(&self.llm), self.thresholds.clone())),
            Box::new(CostGateStage::new(self.thresholds.clone())),
            Box::new(ContentFetchStage::new(
                Arc::clone(&self.fetcher),
                Arc::clone(&self.resolver),
                self.thresholds.clone(),
            )),
            Box::new(DedupStage::new(self.thresholds.clone())),
            Box::new(ClassifyStage::new(Arc::clone(&self.llm), self.thresholds.clone())),
            Box::new(PersonalizeStage::new(self.thresholds.clone())),
        ]
    }

    /// Run every per-article stage in order over the given URLs. Each stage
    /// filters via its own prerequisite checks, so the same URL set is handed
    /// to all stages. A per-batch fatal error aborts the remaining stages and
    /// returns the partial report.
    pub async fn process_batch(
        &self,
        urls: Vec<String>,
        holdings: Vec<Holding>,
        profile: Profile,
    ) -> PipelineReport {
        let ctx = self.context(holdings, profile);
        let mut report = PipelineReport { articles: urls.len(), ..PipelineReport::default() };

        for stage in self.stages() {
            let stage_report = run_stage(stage.as_ref(), &ctx, &urls).await;
            let aborted = stage_report.aborted.is_some();
            report.stages.push(stage_report);
            if aborted {
                tracing::warn!("Pipeline aborted mid-run; returning partial results");
                break;
            }
        }

        report
    }

    /// Process the most promising `top_n` articles synchronously and the rest
    /// in a background task. Articles are ordered by Stage 1 relevance, then
    /// recency; rows without triage output sort last in input order. A batch
    /// no larger than `top_n` degrades to a plain synchronous run.
    pub async fn process_batch_incremental(
        self: Arc<Self>,
        urls: Vec<String>,
        holdings: Vec<Holding>,
        profile: Profile,
        top_n: Option<usize>,
    ) -> (PipelineReport, Option<JoinHandle<PipelineReport>>) {
        let top_n = top_n.unwrap_or(self.incremental_top_n).max(1);
        if urls.len() <= top_n {
            return (self.process_batch(urls, holdings, profile).await, None);
        }

        let ordered = self.order_for_incremental(urls).await;
        let (top, rest) = ordered.split_at(top_n.min(ordered.len()));
        let top: Vec<String> = top.to_vec();
        let rest: Vec<String> = rest.to_vec();

        let top_report = self.process_batch(top, holdings.clone(), profile).await;

        let pipeline = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let report = pipeline.process_batch(rest, holdings, profile).await;
            if report.aborted() {
                tracing::error!("Background pipeline batch aborted");
            }
            report
        });

        (top_report, Some(handle))
    }

    async fn order_for_incremental(&self, urls: Vec<String>) -> Vec<String> {
        let rows = match self.store.get_by_urls(&urls).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Incremental ordering lookup failed ({}), keeping input order", e);
                return urls;
            },
        };

        let mut keyed: Vec<(i64, i64, usize, String)> = Vec::with_capacity(urls.len());
        for (position, url) in urls.iter().enumerate() {
            let row = rows.iter().find(|r| &r.url == url);
            let relevance = row.and_then(|r| r.title_relevance).unwrap_or(-1);
            let published = row
                .and_then(|r| r.published_at)
                .map(|t| t.timestamp())
                .unwrap_or(i64::MIN);
            keyed.push((relevance, published, position, url.clone()));
        }

        keyed.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });
        keyed.into_iter().map(|(_, _, _, url)| url).collect()
    }

    /// Stage 5 entry point: rank and cluster everything currently
    /// personalized. Not part of the per-article orchestration.
    pub async fn process_batch_ranking(
        &self,
        cutoff: Option<i64>,
        limit: Option<i64>,
    ) -> anyhow::Result<RankingReport> {
        RankingStage::new(self.thresholds.clone())
            .run(&self.store, cutoff, limit)
            .await
    }
}

/// Background driver: periodically picks up rows that still need work and
/// pushes them through the pipeline plus a ranking pass.
pub struct PipelineTickTask {
    pipeline: Arc<Pipeline>,
    holdings_loader: Arc<crate::services::holding_service::HoldingService>,
    profile: Profile,
    batch_limit: i64,
}

impl PipelineTickTask {
    pub fn new(
        pipeline: Arc<Pipeline>,
        holdings_loader: Arc<crate::services::holding_service::HoldingService>,
        profile: Profile,
        batch_limit: i64,
    ) -> Self {
        Self { pipeline, holdings_loader, profile, batch_limit }
    }

    /// Spawn the tick loop. The first tick fires one interval after spawn;
    /// a tick that overruns its interval delays the next one instead of
    /// bursting. A failed tick is logged and the loop keeps going.
    pub fn spawn(self, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick

            loop {
                ticker.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!("Pipeline tick failed: {}", e);
                }
            }
        })
    }

    async fn tick(&self) -> Result<(), anyhow::Error> {
        let pending = self
            .pipeline
            .store()
            .list_needs_processing(self.batch_limit)
            .await?;
        if pending.is_empty() {
            return Ok(());
        }

        let urls: Vec<String> = pending.into_iter().map(|a| a.url).collect();
        let holdings = self.holdings_loader.list_holdings().await?;

        tracing::info!("Pipeline tick: processing {} articles", urls.len());
        let report = self
            .pipeline
            .process_batch(urls, holdings, self.profile)
            .await;
        if report.aborted() {
            anyhow::bail!("pipeline tick aborted mid-run");
        }

        let ranking = self.pipeline.process_batch_ranking(None, None).await?;
        tracing::info!(
            "Pipeline tick done: {} ranked across {} clusters, {} shown",
            ranking.ranked,
            ranking.clusters,
            ranking.shown
        );
        Ok(())
    }
}

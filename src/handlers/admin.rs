//! Admin control surface: ingest, process, rank, health, clear.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::AppState;
use crate::models::article::Profile;
use crate::services::news_provider::IngestReport;
use crate::services::pipeline::PipelineReport;
use crate::services::pipeline::rank::RankingReport;
use crate::utils::ApiResult;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct IngestRequest {
    /// Macro topic to search; holdings are used when absent.
    pub query: Option<String>,
    pub limit: Option<usize>,
}

/// Ingest articles from the configured news provider.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<Json<IngestReport>> {
    let limit = req.limit.unwrap_or(50);

    let report = match req.query {
        Some(query) if !query.trim().is_empty() => {
            state.ingest_service.ingest_topic(query.trim(), limit).await?
        },
        _ => {
            let holdings = state.holding_service.list_holdings().await?;
            state
                .ingest_service
                .ingest_for_holdings(&holdings, limit)
                .await?
        },
    };

    Ok(Json(report))
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ProcessRequest {
    pub limit: Option<i64>,
    pub user_profile: Option<String>,
    /// Process the best `top_n` synchronously and the rest in the background.
    pub top_n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub selected: usize,
    pub background: bool,
    pub report: PipelineReport,
}

/// Run the per-article pipeline over rows that still need processing.
pub async fn process(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    let limit = req.limit.unwrap_or(state.config.pipeline.tick_batch_limit);
    let profile = req
        .user_profile
        .as_deref()
        .map(Profile::parse_or_balanced)
        .unwrap_or_else(|| Profile::parse_or_balanced(&state.config.pipeline.user_profile));

    let pending = state.article_store.list_needs_processing(limit).await?;
    let urls: Vec<String> = pending.into_iter().map(|a| a.url).collect();
    let selected = urls.len();
    let holdings = state.holding_service.list_holdings().await?;

    tracing::info!(
        "Processing {} articles (profile {})",
        selected,
        profile.as_str()
    );

    let (report, background) = if req.top_n.is_some() {
        let (report, handle) = Arc::clone(&state.pipeline)
            .process_batch_incremental(urls, holdings, profile, req.top_n)
            .await;
        (report, handle.is_some())
    } else {
        (state.pipeline.process_batch(urls, holdings, profile).await, false)
    };

    Ok(Json(ProcessResponse { selected, background, report }))
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RankRequest {
    pub cutoff_score: Option<i64>,
    pub limit: Option<i64>,
}

/// Run the store-wide ranking & clustering step.
pub async fn rank(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RankRequest>,
) -> ApiResult<Json<RankingReport>> {
    let report = state
        .pipeline
        .process_batch_ranking(req.cutoff_score, req.limit)
        .await?;
    Ok(Json(report))
}

/// Row counts by status.
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let counts = state.article_store.status_counts().await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let statuses: BTreeMap<String, i64> = counts.into_iter().collect();

    Ok(Json(json!({
        "total": total,
        "statuses": statuses,
        "llm_available": state.llm_available,
    })))
}

/// Development reset: delete every article row.
pub async fn clear(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.article_store.clear_all().await?;
    tracing::warn!("Cleared {} article rows", deleted);
    Ok(Json(json!({ "deleted": deleted })))
}

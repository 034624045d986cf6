//! Feed endpoint: the ranked, personalized article list.

use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::AppState;
use crate::models::article::Article;
use crate::services::feed_service::FeedQuery;
use crate::utils::ApiResult;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FeedParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Comma-separated source names.
    pub sources: Option<String>,
    pub limit: Option<i64>,
    pub min_score: Option<i64>,
}

pub async fn get_feed(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> ApiResult<Json<Vec<Article>>> {
    let sources = params
        .sources
        .as_deref()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let query = FeedQuery {
        from: params.from,
        to: params.to,
        sources,
        limit: params.limit,
        min_score: params.min_score,
    };

    let articles = state.feed_service.feed(&query).await?;
    Ok(Json(articles))
}

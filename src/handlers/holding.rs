//! Holdings endpoints for the default user.

use axum::Json;
use axum::extract::{Path, State};
use std::sync::Arc;

use crate::AppState;
use crate::models::holding::{CreateHoldingRequest, Holding};
use crate::utils::ApiResult;

pub async fn list_holdings(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Holding>>> {
    let holdings = state.holding_service.list_holdings().await?;
    Ok(Json(holdings))
}

pub async fn add_holding(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateHoldingRequest>,
) -> ApiResult<Json<Holding>> {
    let holding = state.holding_service.add_holding(req).await?;
    Ok(Json(holding))
}

pub async fn remove_holding(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.holding_service.remove_holding(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

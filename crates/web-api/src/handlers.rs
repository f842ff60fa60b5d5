use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use predmarket_core::{Position, Repository, TradeLogEntry};
use predmarket_supervisor::{HealthView, OrchestratorHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state behind the status endpoints.
pub struct ApiState {
    pub orchestrator: OrchestratorHandle,
    pub repo: Arc<dyn Repository>,
}

#[derive(Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
}

#[derive(Serialize)]
pub struct TradesResponse {
    pub trades: Vec<TradeLogEntry>,
}

#[derive(Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_trades_limit")]
    pub limit: usize,
}

const fn default_trades_limit() -> usize {
    50
}

/// Per-domain supervisor state summary plus the trading state.
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthView> {
    Json(state.orchestrator.health().await)
}

/// Current open positions.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the repository read fails.
pub async fn positions(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<PositionsResponse>, StatusCode> {
    let portfolio = state
        .repo
        .portfolio()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let positions = portfolio.open_positions().cloned().collect();
    Ok(Json(PositionsResponse { positions }))
}

/// Recent trade log entries, newest first.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the repository read fails.
pub async fn trades(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<TradesResponse>, StatusCode> {
    let trades = state
        .repo
        .recent_trades(query.limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(TradesResponse { trades }))
}

/// Operator clearance for a tripped circuit breaker. The only mutating
/// route; everything else on this server is read-only.
pub async fn clear_halt(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.orchestrator.clear_halt();
    StatusCode::NO_CONTENT
}

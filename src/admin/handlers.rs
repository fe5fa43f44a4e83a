use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::http::server::AppState;
use crate::pool::PoolStats;
use crate::security::{BlacklistEntry, LimiterStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub pool_closed: bool,
    pub circuit_breaker: &'static str,
    pub rate_limit_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct BlockParams {
    /// Ban length; defaults to the configured blacklist duration.
    pub duration_secs: Option<u64>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let circuit = state.pool.circuit_state();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.pool.is_closed() { "stopping" } else { "operational" },
        pool_closed: state.pool.is_closed(),
        circuit_breaker: circuit.as_str(),
        rate_limit_enabled: state.limiter.is_enabled(),
    })
}

pub async fn get_pool(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.pool.stats())
}

pub async fn get_limiter(State(state): State<AppState>) -> Json<LimiterStats> {
    Json(state.limiter.stats())
}

pub async fn get_blacklist(State(state): State<AppState>) -> Json<Vec<BlacklistEntry>> {
    Json(state.limiter.blacklisted())
}

pub async fn block_client(
    State(state): State<AppState>,
    Path(client): Path<String>,
    Query(params): Query<BlockParams>,
) -> impl IntoResponse {
    let duration = params
        .duration_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.limiter.config().blacklist_duration());
    state.limiter.block(&client, duration);
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "client_id": client,
            "duration_secs": duration.as_secs(),
        })),
    )
}

pub async fn unblock_client(
    State(state): State<AppState>,
    Path(client): Path<String>,
) -> StatusCode {
    if state.limiter.unblock(&client) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

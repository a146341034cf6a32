//! Fleet/quota/proxy status handlers

use axum::{extract::State, http::StatusCode, response::Json};

use modelgate_core::status::{AccountStatus, ProxyStatus, QuotaStatus};

use crate::state::AppState;

pub async fn get_fleet_status(State(state): State<AppState>) -> Json<Vec<AccountStatus>> {
    Json(state.status().fleet_snapshot())
}

pub async fn get_quota_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<QuotaStatus>>, (StatusCode, String)> {
    state
        .status()
        .quota_snapshot()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn get_proxy_status(State(state): State<AppState>) -> Json<Vec<ProxyStatus>> {
    Json(state.status().proxy_snapshot().await)
}

pub async fn recalculate_proxy_counts(
    State(state): State<AppState>,
) -> Result<Json<bool>, (StatusCode, String)> {
    state
        .proxies()
        .recalculate_counts()
        .await
        .map(|()| Json(true))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

//! API Routes
//!
//! Read-only status endpoints derived from the fleet, quota, and proxy state,
//! plus the operator action for proxy count recalculation.

mod status;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status/fleet", get(status::get_fleet_status))
        .route("/status/quota", get(status::get_quota_status))
        .route("/status/proxies", get(status::get_proxy_status))
        .route("/proxies/recalculate", post(status::recalculate_proxy_counts))
}

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::services::{StoreHealth, UsageDataStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<UsageDataStore>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: String,
    #[serde(flatten)]
    pub health: StoreHealth,
}

/// Health check handler
///
/// Returns 503 only when the durable backend is unreachable; a degraded
/// cache still reports 200.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let health = state.store.health().await;

    let status_code = if health.database.reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        health,
    };

    (status_code, Json(response))
}

/// Simple ping handler
pub async fn ping() -> &'static str {
    "pong"
}

pub mod health;

use axum::{routing::get, Router};
use std::sync::Arc;

pub use health::{health_check, ping, AppState, HealthResponse};

/// Router for the operational endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(ping))
        .with_state(state)
}

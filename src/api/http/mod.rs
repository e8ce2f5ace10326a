// src/api/http/mod.rs
// Router assembly for the gateway's HTTP surface

pub mod feedback;
pub mod health;
pub mod query;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Whole-request deadline; overload surfaces as timeouts, not queuing
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(query::submit_query))
        .route("/query/continue", post(query::continue_query))
        .route(
            "/query/conversation/{id}",
            get(query::get_conversation).delete(query::abort_conversation),
        )
        .route("/feedback", post(feedback::submit_feedback))
        .route("/feedback/stats", get(feedback::feedback_stats))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/live", get(health::liveness_check))
        .route("/metrics", get(health::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

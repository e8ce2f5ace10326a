// src/api/http/health.rs
// Health, readiness, and liveness endpoints plus metrics exposition

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::monitor::HealthStatus;
use crate::state::AppState;

/// GET /health
///
/// 200 while the gateway is healthy or degraded, 503 when any service is
/// unhealthy.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.snapshot();
    let overall = state.monitor.overall();

    let services: serde_json::Map<String, serde_json::Value> = snapshot
        .iter()
        .map(|(name, health)| {
            (
                name.clone(),
                json!({
                    "status": health.status.as_str(),
                    "latency_ms": health.last_latency_ms,
                    "consecutive_failures": health.consecutive_failures,
                    "last_error": health.last_error,
                    "breaker": state.breaker.phase(name),
                }),
            )
        })
        .collect();

    let body = json!({
        "status": overall.as_str(),
        "services": services,
    });

    let status_code = if overall == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(body))
}

/// GET /ready - readiness probe: at least one probe round has completed
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.snapshot();
    let probed = snapshot
        .values()
        .any(|h| h.status != HealthStatus::Unknown);

    if probed {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready"})),
        )
    }
}

/// GET /live - liveness probe
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "alive"})))
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prom.render(),
    )
}

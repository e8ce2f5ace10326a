// src/api/http/feedback.rs
// Feedback submission and aggregate statistics

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::metrics::{Feedback, FeedbackRating};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Query identifier the feedback refers to
    pub request_id: String,
    pub feedback: FeedbackRating,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub project: Option<String>,
}

/// POST /feedback
///
/// At most one feedback per query: a second submission for the same
/// request_id returns 409.
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<Value>> {
    let feedback = Feedback {
        query_id: request.request_id.clone(),
        rating: request.feedback,
        comment: request.comment,
        created_at: Utc::now(),
    };
    state.records.attach_feedback(&feedback).await?;
    Ok(Json(json!({
        "success": true,
        "request_id": request.request_id,
    })))
}

/// GET /feedback/stats
pub async fn feedback_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<Value>> {
    let stats = state
        .records
        .feedback_stats(params.project.as_deref())
        .await?;
    Ok(Json(json!({
        "useful": stats.useful,
        "not_useful": stats.not_useful,
        "partial": stats.partial,
        "total": stats.total(),
        "usefulness_rate": stats.usefulness_rate(),
    })))
}

// src/api/http/query.rs
// Query pipeline endpoints: /query, /query/continue, and the conversation
// inspection/abort routes

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::orchestrator::{ContinueRequest, GatewayResponse, QueryRequest};
use crate::state::AppState;

/// POST /query
pub async fn submit_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<GatewayResponse>> {
    let response = state.orchestrator.handle_query(request).await?;
    Ok(Json(response))
}

/// POST /query/continue
pub async fn continue_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContinueRequest>,
) -> ApiResult<Json<GatewayResponse>> {
    let response = state.orchestrator.continue_conversation(request).await?;
    Ok(Json(response))
}

/// GET /query/conversation/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conversation = state
        .conversations
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("conversation {id} not found")))?;
    Ok(Json(serde_json::to_value(conversation).map_err(|e| {
        ApiError::internal(format!("failed to serialize conversation: {e}"))
    })?))
}

/// DELETE /query/conversation/{id}
pub async fn abort_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .conversations
        .end(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("conversation {id} not found")))?;
    Ok(Json(json!({
        "success": true,
        "aborted_at": Utc::now(),
    })))
}

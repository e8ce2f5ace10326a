// tests/query_pipeline_test.rs
// End-to-end scenarios over the HTTP surface with in-memory backends

mod test_helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use lantern::metrics::{QueryStatus, RecordStore};

async fn post_json(router: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn clear_one_shot_query_returns_cited_results() {
    let app = test_helpers::create_test_app();

    let (status, body) = post_json(
        &app.router,
        "/query",
        json!({
            "query": "Show me the AuthService class",
            "mode": "one-shot",
            "request_id": "req-s1"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    // Query responses carry no discriminator field
    assert!(body.get("type").is_none());
    assert_eq!(body["status"], "success");
    assert!(
        body["results"]["semantic"]["matches"][0]["source"]
            .as_str()
            .unwrap()
            .contains("auth_service")
    );
    assert!(body["answer"]["text"].as_str().unwrap().contains("AuthService"));
    assert!(!body["answer"]["citations"].as_array().unwrap().is_empty());

    // Exactly one query record, terminal, clarity clear
    let record = app.records.get_query("req-s1").await.unwrap().unwrap();
    assert_eq!(record.status, QueryStatus::Success);
    assert_eq!(record.clarity, "clear");
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn ambiguous_query_opens_conversation() {
    let app = test_helpers::create_test_app();

    let (status, body) = post_json(
        &app.router,
        "/query",
        json!({"query": "What about the auth thing?", "mode": "auto"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "conversation");
    assert_eq!(body["round"], 1);
    assert_eq!(body["max_rounds"], 3);

    let questions = body["clarifications"]["questions"].as_array().unwrap();
    assert!(questions.iter().any(|q| q["key"] == "aspect"));

    // Conversation state is in the shared cache
    let conversation_id = body["conversation_id"].as_str().unwrap();
    let stored = app.state.conversations.get(conversation_id).await.unwrap();
    assert_eq!(stored.round, 1);
}

#[tokio::test]
async fn continue_with_sufficient_context_executes_and_cleans_up() {
    let app = test_helpers::create_test_app();

    let (_, opened) = post_json(
        &app.router,
        "/query",
        json!({"query": "What about the auth thing?", "mode": "auto"}),
    )
    .await;
    let conversation_id = opened["conversation_id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &app.router,
        "/query/continue",
        json!({
            "conversation_id": conversation_id,
            "answers": {"aspect": "How it works", "scope": "All components"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("type").is_none());
    assert!(body["status"] == "success" || body["status"] == "partial");
    assert_eq!(body["meta"]["conversation_rounds"], 2);

    // Conversation deleted from the shared cache after execution
    assert!(app.state.conversations.get(&conversation_id).await.is_none());

    // The record opened as pending_clarification is finalized under the
    // same query id carried through the conversation
    let record_id = body["request_id"].as_str().unwrap();
    let record = app.records.get_query(record_id).await.unwrap().unwrap();
    assert!(record.status.is_terminal());
}

#[tokio::test]
async fn continue_with_thin_context_asks_follow_up() {
    let app = test_helpers::create_test_app();

    let (_, opened) = post_json(
        &app.router,
        "/query",
        json!({"query": "What about the auth thing?", "mode": "auto"}),
    )
    .await;
    let conversation_id = opened["conversation_id"].as_str().unwrap();

    let (status, body) = post_json(
        &app.router,
        "/query/continue",
        json!({
            "conversation_id": conversation_id,
            "answers": {"aspect": "How it works"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "conversation");
    assert_eq!(body["round"], 2);
    // Already-answered keys are not asked again
    let questions = body["clarifications"]["questions"].as_array().unwrap();
    assert!(questions.iter().all(|q| q["key"] != "aspect"));
}

#[tokio::test]
async fn continue_unknown_conversation_is_404() {
    let app = test_helpers::create_test_app();
    let (status, _) = post_json(
        &app.router,
        "/query/continue",
        json!({"conversation_id": "missing", "answers": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn graph_breaker_open_degrades_to_partial() {
    let app = test_helpers::create_test_app();

    // Trip the graph breaker before the query
    app.state.breaker.force_open("graph");

    let (status, body) = post_json(
        &app.router,
        "/query",
        json!({"query": "Show me the AuthService class", "mode": "one-shot"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(
        body["results"]["structural"]["relationships"],
        json!([])
    );
    let warnings = body["warnings"].as_array().unwrap();
    assert!(warnings.contains(&json!("structural_unavailable")));
    assert!(body["meta"]["backend_latencies"].get("graph").is_none());
    assert!(body["meta"]["backend_latencies"].get("vector").is_some());
}

#[tokio::test]
async fn all_breakers_open_is_unavailable_with_fallback_message() {
    let app = test_helpers::create_test_app();
    app.state.breaker.force_open("vector");
    app.state.breaker.force_open("graph");

    let (status, body) = post_json(
        &app.router,
        "/query",
        json!({"query": "Show me the AuthService class", "mode": "one-shot"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unavailable");
    assert!(body["meta"]["message"].as_str().unwrap().contains("unavailable"));
    assert_eq!(body["answer"]["confidence"], 0.0);
    assert_eq!(
        body["answer"]["text"],
        "Insufficient information in the indexed codebase to answer this question."
    );
}

#[tokio::test]
async fn raw_mode_skips_synthesis() {
    let app = test_helpers::create_test_app();

    let (status, body) = post_json(
        &app.router,
        "/query",
        json!({
            "query": "Show me the AuthService class",
            "mode": "one-shot",
            "synthesis_mode": "raw"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body.get("answer").is_none());
    assert!(!body["results"]["semantic"]["matches"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let app = test_helpers::create_test_app();
    let (status, body) = post_json(&app.router, "/query", json!({"query": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn conversation_inspect_and_abort() {
    let app = test_helpers::create_test_app();

    let (_, opened) = post_json(
        &app.router,
        "/query",
        json!({"query": "What about the auth thing?", "mode": "auto"}),
    )
    .await;
    let conversation_id = opened["conversation_id"].as_str().unwrap();

    let (status, state) = get(
        &app.router,
        &format!("/query/conversation/{conversation_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["original_query"], "What about the auth thing?");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/query/conversation/{conversation_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Gone after the abort; a second abort is 404
    let (status, _) = get(
        &app.router,
        &format!("/query/conversation/{conversation_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

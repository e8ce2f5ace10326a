// tests/ops_api_test.rs
// Feedback, health, and metrics endpoints

mod test_helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

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

async fn get_raw(router: &axum::Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn feedback_round_trip_then_conflict() {
    let app = test_helpers::create_test_app();

    // Complete a query first so a record exists
    let (_, body) = post_json(
        &app.router,
        "/query",
        json!({
            "query": "Show me the AuthService class",
            "mode": "one-shot",
            "request_id": "req-s5"
        }),
    )
    .await;
    assert_eq!(body["request_id"], "req-s5");

    let (status, _) = post_json(
        &app.router,
        "/feedback",
        json!({"request_id": "req-s5", "feedback": "useful"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A second identical submission conflicts
    let (status, body) = post_json(
        &app.router,
        "/feedback",
        json!({"request_id": "req-s5", "feedback": "useful"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, raw) = get_raw(&app.router, "/feedback/stats").await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(stats["useful"], 1);
    assert_eq!(stats["total"], 1);
}

#[tokio::test]
async fn feedback_for_unknown_query_is_404() {
    let app = test_helpers::create_test_app();
    let (status, body) = post_json(
        &app.router,
        "/feedback",
        json!({"request_id": "no-such-query", "feedback": "useful"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn feedback_rejects_unknown_rating() {
    let app = test_helpers::create_test_app();
    let (status, _) = post_json(
        &app.router,
        "/feedback",
        json!({"request_id": "x", "feedback": "amazing"}),
    )
    .await;
    // serde rejects the enum value before the handler runs
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn health_endpoint_reports_services() {
    let app = test_helpers::create_test_app();
    let (status, body) = get_raw(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let parsed: Value = body.parse().unwrap();
    // No probes configured in the test app: overall healthy, no services
    assert_eq!(parsed["status"], "healthy");
}

#[tokio::test]
async fn liveness_always_responds() {
    let app = test_helpers::create_test_app();
    let (status, body) = get_raw(&app.router, "/live").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("alive"));
}

#[tokio::test]
async fn metrics_exposition_counts_queries() {
    let app = test_helpers::create_test_app();

    post_json(
        &app.router,
        "/query",
        json!({"query": "Show me the AuthService class", "mode": "one-shot"}),
    )
    .await;

    let (status, body) = get_raw(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("lantern_queries_total"));
    assert!(body.contains("status=\"success\""));
}

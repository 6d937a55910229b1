mod common;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::{body_json, onboard, spawn_app, TestRequest, FIXED_OTP};
use serde_json::json;

#[tokio::test]
async fn test_trace_id_is_echoed_or_generated() {
    let app = spawn_app();

    let response = TestRequest::get("/api/v1/health/alive")
        .header("x-trace-id", "trace-abc-123")
        .send(&app)
        .await;
    assert_eq!(
        response.headers().get("x-trace-id").unwrap(),
        "trace-abc-123"
    );

    let response = TestRequest::get("/api/v1/health/alive").send(&app).await;
    let generated = response
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(!generated.is_empty());
}

#[tokio::test]
async fn test_invalid_tenant_token_does_not_fail_public_routes() {
    let app = spawn_app();
    onboard(&app, "acme").await;

    let forged = STANDARD.encode("acme:not-the-secret");
    let response = TestRequest::get("/api/v1/health/alive")
        .tenant(&forged)
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = TestRequest::get("/api/v1/health/alive")
        .tenant("%%%not-base64%%%")
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_tenant_token_leaves_request_unbound() {
    let app = spawn_app();
    onboard(&app, "acme").await;

    TestRequest::post("/api/v1/users/otp/send")
        .json(json!({ "target": "+15551234567" }))
        .send(&app)
        .await;

    let forged = STANDARD.encode("acme:not-the-secret");
    let response = TestRequest::post("/api/v1/users/otp/verify")
        .tenant(&forged)
        .json(json!({ "target": "+15551234567", "code": FIXED_OTP }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let unknown = STANDARD.encode("globex:whatever");
    let response = TestRequest::post("/api/v1/users/otp/verify")
        .tenant(&unknown)
        .json(json!({ "target": "+15551234567", "code": FIXED_OTP }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_tenant_token_binds_tenant() {
    let app = spawn_app();
    let token = onboard(&app, "acme").await;

    TestRequest::post("/api/v1/users/otp/send")
        .json(json!({ "target": "+15551234567" }))
        .send(&app)
        .await;

    let response = TestRequest::post("/api/v1/users/otp/verify")
        .tenant(&token)
        .json(json!({ "target": "+15551234567", "code": FIXED_OTP }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["tenantId"], "acme");
}

#[tokio::test]
async fn test_deleted_tenant_token_no_longer_binds() {
    let app = spawn_app();
    let token = onboard(&app, "acme").await;

    app.repo.delete_tenant("acme").await.unwrap();

    let response = TestRequest::post("/api/v1/users/otp/verify")
        .tenant(&token)
        .json(json!({ "target": "+15551234567", "code": FIXED_OTP }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

//! HTTP API 集成测试

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

mod common;
use common::{FailingStore, TestContext};

const CLIENT_IP: &str = "203.0.113.7";

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", CLIENT_IP)
        .header(header::USER_AGENT, "api-test")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = TestContext::new();
    let response = ctx.router().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-trace-id"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert!(json["uptime_secs"].is_number());
}

#[tokio::test]
async fn test_readiness_reflects_cache_store() {
    let ctx = TestContext::new();
    let response = ctx.router().oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"][0]["name"], "cache");

    let broken = TestContext::with_store(Arc::new(FailingStore));
    let response = broken.router().oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["ready"], false);
    assert_eq!(json["checks"][0]["status"], "unhealthy");
}

#[tokio::test]
async fn test_login_check_allows_then_rate_limits() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/check",
            json!({ "email": "a@b.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["action"], "login");
    assert_eq!(json["data"]["rateLimit"]["allowed"], true);
    assert_eq!(json["data"]["rateLimit"]["remaining"], 4);

    for _ in 0..4 {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/auth/login/check",
                json!({ "email": "a@b.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/check",
            json!({ "email": "a@b.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "900");
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["type"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(json["error"]["retryAfter"], 900);
    assert_eq!(json["requestId"], request_id);
}

#[tokio::test]
async fn test_locked_account_returns_423() {
    let ctx = TestContext::new();
    let lockouts = &ctx.state.lockout_service;
    for expected in 1..=5 {
        assert_eq!(lockouts.increment_login_attempts("a@b.com").await, expected);
    }
    lockouts.lock_account("a@b.com", "Too many failed login attempts").await.expect("locked");

    let response = ctx
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/check",
            json!({ "email": "a@b.com", "action": "login" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::LOCKED);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1800");
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "ACCOUNT_LOCKED");
    assert_eq!(json["error"]["code"], "ACCOUNT_LOCKED");
    assert_eq!(json["error"]["retryAfter"], 1800);
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/login/check")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"email\": \"leak-marker-7731"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "VALIDATION_ERROR");
    assert_eq!(json["error"]["field"], "body");
    assert!(!json.to_string().contains("leak-marker-7731"));
}

#[tokio::test]
async fn test_bad_query_does_not_echo_input() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(get("/api/v1/admin/security/events/a@b.com?limit=leak-marker-42"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "VALIDATION_ERROR");
    assert_eq!(json["error"]["field"], "query");
    assert!(!json.to_string().contains("leak-marker-42"));
}

#[tokio::test]
async fn test_bad_email_is_rejected() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/check",
            json!({ "email": "nope" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "EMAIL_FORMAT");
    assert_eq!(json["error"]["field"], "email");
}

#[tokio::test]
async fn test_login_outcome_flow() {
    let ctx = TestContext::new();
    let app = ctx.router();

    for attempt in 1..=5u64 {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/auth/login/outcome",
                json!({ "email": "a@b.com", "success": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["failedAttempts"], attempt);
        assert_eq!(json["data"]["locked"], attempt == 5);
    }

    let response = app
        .clone()
        .oneshot(get("/api/v1/admin/lockouts"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"][0]["email"], "a@b.com");
    assert_eq!(json["data"][0]["reason"], "Too many failed login attempts");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/v1/admin/lockouts/a@b.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(ctx.state.lockout_service.get_account_lockout("a@b.com").await.is_none());

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/outcome",
            json!({ "email": "a@b.com", "success": true, "userId": "user-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["failedAttempts"], 0);
    assert_eq!(json["data"]["locked"], false);
}

#[tokio::test]
async fn test_successful_outcome_requires_user_id() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/outcome",
            json!({ "email": "a@b.com", "success": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["field"], "userId");
}

#[tokio::test]
async fn test_recent_events_endpoint() {
    let ctx = TestContext::new();
    let app = ctx.router();

    for _ in 0..3 {
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/auth/login/outcome",
                json!({ "email": "a@b.com", "success": false, "reason": "bad_password" }),
            ))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(get("/api/v1/admin/security/events/a@b.com?limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let events = json["data"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["eventType"], "login_attempt");
    assert_eq!(events[0]["metadata"]["reason"], "bad_password");
    assert_eq!(events[0]["ipAddress"], CLIENT_IP);
}

#[tokio::test]
async fn test_security_report_endpoint() {
    let ctx = TestContext::new();
    let app = ctx.router();

    app.clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/outcome",
            json!({ "email": "a@b.com", "success": false }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/v1/admin/security/report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["totalEvents"], 1);
    assert_eq!(json["data"]["failedEvents"], 1);
    assert_eq!(json["data"]["topIpAddresses"][0]["ipAddress"], CLIENT_IP);

    let response = app
        .oneshot(get(
            "/api/v1/admin/security/report?start=2024-01-16T00:00:00Z&end=2024-01-15T00:00:00Z",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["field"], "start");
}

#[tokio::test]
async fn test_flag_admin_endpoints() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let response = app.clone().oneshot(get("/api/v1/admin/flags")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 5);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::PUT,
            "/api/v1/admin/flags/login_enabled",
            json!({ "enabled": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["enabled"], false);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login/check",
            json!({ "email": "a@b.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(
        json["error"]["message"],
        "This feature is currently unavailable. Please try again later."
    );

    let response = app
        .oneshot(json_request(
            Method::PUT,
            "/api/v1/admin/flags/login_enabled",
            json!({ "rolloutPercentage": 150 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["field"], "rolloutPercentage");
}

#[tokio::test]
async fn test_cleanup_endpoint() {
    let ctx = TestContext::new();
    ctx.state
        .lockout_service
        .lock_account("a@b.com", "manual")
        .await
        .expect("locked");
    ctx.clock.advance_secs(1801);

    let response = ctx
        .router()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/admin/lockouts/cleanup")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["removed"], 1);
}

#[tokio::test]
async fn test_maintenance_endpoint() {
    let ctx = TestContext::new();
    ctx.state
        .lockout_service
        .lock_account("a@b.com", "manual")
        .await
        .expect("locked");
    ctx.clock.advance_secs(1801);

    let response = ctx
        .router()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/admin/maintenance")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["staleLockoutEntries"], 1);
    assert!(json["data"]["expiredCacheKeys"].as_u64().unwrap() >= 1);
    assert_eq!(json["data"]["failedSteps"], json!([]));
}

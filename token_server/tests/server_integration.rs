//! Integration tests for the HTTP API.
//!
//! Every test builds a router over fresh in-memory stores and drives it with
//! `oneshot`, so no database or socket is involved.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use token_server::api::{AppState, create_router};
use tower::ServiceExt; // For `oneshot` method

const USER: &str = "42";

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", USER)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-user-id", USER)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn purchase(reference: &str, base: i64, bonus: i64) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/purchase")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "externalReference": reference,
                "userId": 42,
                "baseTokens": base,
                "bonusTokens": bonus,
                "amountPaidMinorUnits": base * 100,
            })
            .to_string(),
        ))
        .unwrap()
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let app = create_router(AppState::in_memory());

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

// ============================================================================
// Identity Tests
// ============================================================================

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let app = create_router(AppState::in_memory());

    let request = Request::builder()
        .uri("/api/v1/tokens/balance")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Token Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_fresh_user_balance_is_zero() {
    let app = create_router(AppState::in_memory());

    let (status, body) = send(&app, get("/api/v1/tokens/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 0);
    assert_eq!(body["user_id"], 42);
}

#[tokio::test]
async fn test_purchase_webhook_is_idempotent() {
    let app = create_router(AppState::in_memory());

    let (status, first) = send(&app, purchase("pi_http", 10, 2)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["alreadyProcessed"], false);
    assert_eq!(first["newBalance"], 12);

    let (status, second) = send(&app, purchase("pi_http", 10, 2)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["alreadyProcessed"], true);
    assert_eq!(second["newBalance"], 12);

    let (_, summary) = send(&app, get("/api/v1/tokens/summary")).await;
    assert_eq!(summary["balance"], 12);
    assert_eq!(summary["total_purchased"], 12);
}

#[tokio::test]
async fn test_packages_are_public_and_ordered() {
    let app = create_router(AppState::in_memory());

    let request = Request::builder()
        .uri("/api/v1/tokens/packages")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    let packages = body["packages"].as_array().unwrap();
    assert_eq!(packages.len(), 3);
    assert_eq!(packages[0]["name"], "Starter");
    assert_eq!(packages[1]["totalTokens"], 30);
    assert_eq!(packages[1]["valuePerToken"], 0.333);
    assert_eq!(packages[1]["recommended"], true);
}

#[tokio::test]
async fn test_package_purchase_uses_catalog_counts() {
    let app = create_router(AppState::in_memory());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/purchase")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "externalReference": "pi_pkg",
                "userId": 42,
                "amountPaidMinorUnits": 2000,
                "packageId": 3,
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokensAdded"], 75);
    assert_eq!(body["newBalance"], 75);
}

#[tokio::test]
async fn test_purchase_reference_of_another_user_is_conflict() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_taken", 10, 0)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/purchase")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "externalReference": "pi_taken",
                "userId": 7,
                "baseTokens": 10,
                "amountPaidMinorUnits": 1000,
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(!body["error"].as_str().unwrap().contains("pi_taken"));
}

#[tokio::test]
async fn test_invalid_purchase_is_bad_request() {
    let app = create_router(AppState::in_memory());

    let (status, body) = send(&app, purchase("pi_zero", 0, 0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("base tokens"));
}

#[tokio::test]
async fn test_transaction_history_filters_and_pages() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_hist", 30, 0)).await;
    for _ in 0..3 {
        send(
            &app,
            post_json("/api/v1/actions/charge", json!({"action": "premium_analytics"})),
        )
        .await;
    }

    let (status, page) = send(
        &app,
        get("/api/v1/tokens/transactions?kind=consumption&limit=2"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["records"].as_array().unwrap().len(), 2);
    assert_eq!(page["has_more"], true);
    assert_eq!(page["records"][0]["action_type"], "premium_analytics");
}

// ============================================================================
// Contact Gate Tests
// ============================================================================

#[tokio::test]
async fn test_contact_flow_prices_and_charges() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_contact", 10, 0)).await;

    let (status, quote) = send(&app, get("/api/v1/contacts/7/quote")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["pricing"], "free");
    assert_eq!(quote["tokens_required"], 0);

    let (status, first) = send(&app, post_json("/api/v1/contacts/7", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["tokens_spent"], 0);

    let (_, repeat) = send(&app, post_json("/api/v1/contacts/7", json!({}))).await;
    assert_eq!(repeat["pricing"], "repeat_contact");
    assert_eq!(repeat["remaining_balance"], 9);

    let (_, other) = send(&app, post_json("/api/v1/contacts/8", json!({}))).await;
    assert_eq!(other["pricing"], "new_business");
    assert_eq!(other["remaining_balance"], 7);
}

#[tokio::test]
async fn test_unaffordable_action_is_payment_required() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_small", 4, 0)).await;

    let (status, body) = send(
        &app,
        post_json("/api/v1/actions/charge", json!({"action": "boost_listing", "level": 1})),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["required"], 5);
    assert_eq!(body["available"], 4);
    assert_eq!(body["needed"], 1);

    let (_, balance) = send(&app, get("/api/v1/tokens/balance")).await;
    assert_eq!(balance["balance"], 4);
}

#[tokio::test]
async fn test_invalid_boost_level_is_bad_request() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_boost", 50, 0)).await;

    let (status, _) = send(
        &app,
        post_json("/api/v1/actions/charge", json!({"action": "boost_listing", "level": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_is_recorded_on_debit() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_ref", 10, 0)).await;

    let mut request = post_json("/api/v1/actions/charge", json!({"action": "premium_analytics"}));
    request
        .headers_mut()
        .insert("x-request-id", "req-abc".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-abc");

    let (_, page) = send(&app, get("/api/v1/tokens/transactions?kind=consumption")).await;
    assert_eq!(page["records"][0]["metadata"]["reference_id"], "req-abc");
}

#[tokio::test]
async fn test_caller_priced_action_is_rejected() {
    let app = create_router(AppState::in_memory());
    send(&app, purchase("pi_custom", 10, 0)).await;

    let request = post_json(
        "/api/v1/actions/charge",
        json!({"action": "custom", "action_type": "boost_listing", "cost": 1}),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let (_, balance) = send(&app, get("/api/v1/tokens/balance")).await;
    assert_eq!(balance["balance"], 10);
}

//! Integration tests for the FastOTP HTTP API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fastotp::{
    api::{create_router_with_rate_limit, RateLimitState},
    build_state,
    delivery::LogDeliveryGateway,
    payments::Gateways,
    Config, Store, SystemClock,
};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> Config {
    let mut config = Config::default();
    config.otp.secret = SecretString::new("integration-secret".into());
    config.otp.expose_code = true;
    config.payments.dummy.enabled = true;
    config
}

/// Create a test app with memory-only storage and the log delivery gateway.
fn create_test_app(rate_limit: RateLimitState) -> Router {
    let config = test_config();
    let gateways = Gateways::from_config(&config.payments).unwrap();
    let state = build_state(
        &config,
        Arc::new(Store::memory()),
        Arc::new(LogDeliveryGateway::new()),
        gateways,
        Arc::new(SystemClock),
    );
    create_router_with_rate_limit(state, rate_limit)
}

fn app() -> Router {
    create_test_app(RateLimitState::permissive())
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

async fn register(app: &Router, email: &str) -> String {
    let (status, user) = call(
        app,
        "POST",
        "/v1/users",
        None,
        Some(json!({
            "email": email,
            "whatsapp_number": "+234 803 123 4567",
            "first_name": "Ada",
            "last_name": "Obi"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    user["id"].as_str().unwrap().to_string()
}

/// Register, verify over WhatsApp and create a live API key.
async fn onboard(app: &Router) -> (String, String) {
    let user_id = register(app, "ada@example.com").await;

    let (status, issued) = call(
        app,
        "POST",
        &format!("/v1/users/{}/registration-otp", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = issued["code"].as_str().unwrap().to_string();

    let (_, verified) = call(
        app,
        "POST",
        &format!("/v1/users/{}/verify", user_id),
        None,
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(verified["ok"], true);

    let (status, key) = call(
        app,
        "POST",
        "/v1/api-keys",
        None,
        Some(json!({ "user_id": user_id, "name": "production" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (user_id, key["key"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, json) = call(&app(), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["users"], 0);
    assert_eq!(json["persistent"], false);
    assert_eq!(json["gateways"], json!(["dummy"]));
}

#[tokio::test]
async fn test_register_grants_trial_credits() {
    let app = app();
    let user_id = register(&app, "ada@example.com").await;

    let (status, balance) = call(
        &app,
        "GET",
        &format!("/v1/users/{}/balance", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&balance["balance"]), Decimal::new(5, 0));

    let (status, _) = call(
        &app,
        "POST",
        "/v1/users",
        None,
        Some(json!({
            "email": "ADA@example.com",
            "whatsapp_number": "+2348031234567",
            "first_name": "Ada",
            "last_name": "Obi"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_registration_verification() {
    let app = app();
    let user_id = register(&app, "ada@example.com").await;

    let (_, issued) = call(
        &app,
        "POST",
        &format!("/v1/users/{}/registration-otp", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(issued["status"], "sent");
    assert_eq!(decimal(&issued["cost_credits"]), Decimal::ZERO);
    let code = issued["code"].as_str().unwrap().to_string();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let verify_uri = format!("/v1/users/{}/verify", user_id);
    let (status, rejected) = call(&app, "POST", &verify_uri, None, Some(json!({ "code": wrong }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["ok"], false);
    assert_eq!(rejected["reason"], "invalid");

    let (_, accepted) = call(&app, "POST", &verify_uri, None, Some(json!({ "code": code }))).await;
    assert_eq!(accepted["ok"], true);

    let (_, again) = call(&app, "POST", &verify_uri, None, Some(json!({ "code": code }))).await;
    assert_eq!(again["ok"], false);
    assert_eq!(again["reason"], "already_verified");
}

#[tokio::test]
async fn test_api_key_requires_verified_user() {
    let app = app();
    let user_id = register(&app, "ada@example.com").await;
    let (status, json) = call(
        &app,
        "POST",
        "/v1/api-keys",
        None,
        Some(json!({ "user_id": user_id, "name": "production" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_send_and_verify_otp() {
    let app = app();
    let (user_id, api_key) = onboard(&app).await;

    let (status, issued) = call(
        &app,
        "POST",
        "/v1/otp/send",
        Some(&api_key),
        Some(json!({ "identifier": "+254712345678", "channel": "sms" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["status"], "sent");
    assert_eq!(issued["identifier"], "+********5678");
    assert_eq!(decimal(&issued["cost_credits"]), Decimal::new(40, 4));

    let (_, verified) = call(
        &app,
        "POST",
        "/v1/otp/verify",
        Some(&api_key),
        Some(json!({ "otp_log_id": issued["otp_log_id"], "code": issued["code"] })),
    )
    .await;
    assert_eq!(verified["ok"], true);
    assert_eq!(verified["otp_log_id"], issued["otp_log_id"]);

    let (_, balance) = call(
        &app,
        "GET",
        &format!("/v1/users/{}/balance", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(decimal(&balance["balance"]), Decimal::new(49960, 4));
    assert_eq!(decimal(&balance["total_consumed"]), Decimal::new(40, 4));

    let (_, logs) = call(
        &app,
        "GET",
        &format!("/v1/users/{}/otp-logs", user_id),
        None,
        None,
    )
    .await;
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["status"], "verified");
    assert!(logs[0].get("otp_hash").is_none());
}

#[tokio::test]
async fn test_verify_by_identifier() {
    let app = app();
    let (_, api_key) = onboard(&app).await;

    let (_, issued) = call(
        &app,
        "POST",
        "/v1/otp/send",
        Some(&api_key),
        Some(json!({ "identifier": "Bola@Example.com", "channel": "email" })),
    )
    .await;

    let (_, verified) = call(
        &app,
        "POST",
        "/v1/otp/verify",
        Some(&api_key),
        Some(json!({ "identifier": "bola@example.com", "code": issued["code"] })),
    )
    .await;
    assert_eq!(verified["ok"], true);

    let (_, unknown) = call(
        &app,
        "POST",
        "/v1/otp/verify",
        Some(&api_key),
        Some(json!({ "identifier": "+2348000000000", "code": "123456" })),
    )
    .await;
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["reason"], "not_found");
}

#[tokio::test]
async fn test_send_otp_requires_api_key() {
    let app = app();
    let body = json!({ "identifier": "+2348031234567" });

    let (status, _) = call(&app, "POST", "/v1/otp/send", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "POST", "/v1/otp/send", Some("fotk_live_nope"), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoked_key_is_rejected() {
    let app = app();
    let (user_id, _) = onboard(&app).await;

    let (_, staging) = call(
        &app,
        "POST",
        "/v1/api-keys",
        None,
        Some(json!({ "user_id": user_id, "name": "staging", "environment": "test" })),
    )
    .await;
    let raw = staging["key"].as_str().unwrap().to_string();
    assert!(raw.starts_with("fotk_test_"));

    let (status, sent) = call(
        &app,
        "POST",
        "/v1/otp/send",
        Some(&raw),
        Some(json!({ "identifier": "+2348031234567" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["status"], "sent");

    let (status, revoked) = call(
        &app,
        "POST",
        &format!("/v1/api-keys/{}/revoke", staging["id"].as_str().unwrap()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked["status"], "revoked");
    assert!(revoked.get("key").is_none());

    let (status, _) = call(
        &app,
        "POST",
        "/v1/otp/send",
        Some(&raw),
        Some(json!({ "identifier": "+2348031234567" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_send_otp_rejects_oversized_ttl() {
    let app = app();
    let (user_id, raw) = onboard(&app).await;

    let (status, error) = call(
        &app,
        "POST",
        "/v1/otp/send",
        Some(&raw),
        Some(json!({ "identifier": "+2348031234567", "ttl_seconds": 10_000_000_000_000u64 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "VALIDATION_ERROR");

    let (_, balance) = call(&app, "GET", &format!("/v1/users/{}/balance", user_id), None, None).await;
    assert_eq!(decimal(&balance["balance"]), Decimal::new(5, 0));
}

#[tokio::test]
async fn test_update_profile() {
    let app = app();
    let user_id = register(&app, "ada@example.com").await;

    let (status, user) = call(
        &app,
        "PATCH",
        &format!("/v1/users/{}", user_id),
        None,
        Some(json!({ "first_name": "Grace", "last_name": "Hopper", "phone_number": "+1 (202) 555-0143" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["avatar_initials"], "GH");
    assert_eq!(user["phone_number"], "+12025550143");
    assert_eq!(user["whatsapp_number"], "+2348031234567");

    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/v1/users/{}", user_id),
        None,
        Some(json!({ "phone_number": "555-0143" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_api_keys_hides_raw_keys() {
    let app = app();
    let (user_id, raw) = onboard(&app).await;

    let (status, keys) = call(&app, "GET", &format!("/v1/users/{}/api-keys", user_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let keys = keys.as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["name"], "production");
    assert_eq!(keys[0]["status"], "active");
    assert!(keys[0].get("key").is_none());
    let prefix = keys[0]["prefix"].as_str().unwrap().trim_end_matches("...");
    assert!(raw.starts_with(prefix));
}

#[tokio::test]
async fn test_top_up_with_duplicate_callback() {
    let app = app();
    let user_id = register(&app, "ada@example.com").await;

    let (_, packages) = call(&app, "GET", "/v1/packages", None, None).await;
    assert_eq!(packages.as_array().unwrap().len(), 4);

    let (status, checkout) = call(
        &app,
        "POST",
        "/v1/topups",
        None,
        Some(json!({ "user_id": user_id, "package_id": 1, "gateway": "dummy" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reference = checkout["reference"].as_str().unwrap().to_string();
    assert!(checkout["checkout_url"]
        .as_str()
        .unwrap()
        .ends_with(&format!("reference={}", reference)));

    let callback = format!("/v1/payments/callback/dummy?reference={}", reference);
    let (status, first) = call(&app, "GET", &callback, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "credited");

    let (_, second) = call(
        &app,
        "POST",
        "/v1/payments/webhook/dummy",
        None,
        Some(json!({ "event": "charge.success", "data": { "reference": reference } })),
    )
    .await;
    assert_eq!(second["outcome"], "already_credited");

    let (_, balance) = call(
        &app,
        "GET",
        &format!("/v1/users/{}/balance", user_id),
        None,
        None,
    )
    .await;
    assert_eq!(decimal(&balance["balance"]), Decimal::new(505, 0));

    let (_, transactions) = call(
        &app,
        "GET",
        &format!("/v1/users/{}/transactions", user_id),
        None,
        None,
    )
    .await;
    let transactions = transactions.as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["status"], "completed");
    assert_eq!(transactions[0]["gateway"], "dummy");
}

#[tokio::test]
async fn test_top_up_rejects_unknown_gateway() {
    let app = app();
    let user_id = register(&app, "ada@example.com").await;

    for gateway in ["trial", "bitcoin", "paystack"] {
        let (status, _) = call(
            &app,
            "POST",
            "/v1/topups",
            None,
            Some(json!({ "user_id": user_id, "package_id": 1, "gateway": gateway })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "gateway {}", gateway);
    }

    let (status, _) = call(&app, "GET", "/v1/payments/callback/dummy", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_user() {
    let app = app();
    let (status, json) = call(
        &app,
        "GET",
        "/v1/users/8a5c1d52-3d1f-4a6e-9a55-0f6d3c0f0e11/transactions",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let app = create_test_app(RateLimitState::new(1));

    let (status, _) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
}

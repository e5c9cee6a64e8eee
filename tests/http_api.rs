mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use axum::extract::ConnectInfo;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use common::*;
use storefront::domain::value_objects::Role;
use storefront::http::rate_limit::{MemoryRateLimiter, RateLimiter};
use storefront::services::payment;

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body, headers)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn with_token(mut req: Request<Body>, token: &str) -> Request<Body> {
    req.headers_mut().insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
    req
}

#[tokio::test]
async fn test_health_and_request_id() {
    let h = harness();
    let app = storefront::router(h.state);

    let (status, body, headers) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "service": "storefront" }));
    assert!(headers.contains_key("x-request-id"));

    let req = Request::get("/api/health").header("x-request-id", "req-123").body(Body::empty()).unwrap();
    let (status, _, headers) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-request-id"], "req-123");
}

#[tokio::test]
async fn test_auth_guards() {
    let h = harness();
    let user = h.state.tokens.issue_for(5, "shopper@example.com", Role::User).unwrap();
    let app = storefront::router(h.state);

    let (status, body, _) = send(&app, get("/api/user/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "No token provided");

    let req = Request::get("/api/orders").header(header::AUTHORIZATION, "Basic abc").body(Body::empty()).unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid authorization header");

    let (status, _, _) = send(&app, with_token(get("/api/orders"), "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body, _) = send(&app, with_token(get("/api/admin/orders"), &user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Admin access required");
}

#[tokio::test]
async fn test_guest_checkout_and_admin_view() {
    let h = harness();
    h.store.insert_product(product(1, 1200, 4));
    let admin = h.state.tokens.issue_for(1, "admin@example.com", Role::Admin).unwrap();
    let shopper = h.state.tokens.issue_for(5, "shopper@example.com", Role::User).unwrap();
    let store = h.store.clone();
    let app = storefront::router(h.state);

    let (status, body, _) = send(&app, post_json("/api/orders", &order_request(&[(1, 2)]))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(store.product(1).unwrap().stock, 2);
    let id = body["id"].as_i64().unwrap();

    let (status, _, _) = send(&app, with_token(get(&format!("/api/orders/{id}")), &shopper)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body, _) = send(&app, with_token(get(&format!("/api/orders/{id}")), &admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);

    let (status, body, _) = send(&app, post_json("/api/orders", &order_request(&[(1, 5)]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Insufficient stock");
    assert_eq!(body["available"], 2);
    assert_eq!(body["requested"], 5);
}

#[tokio::test]
async fn test_coupon_validation_endpoint() {
    let h = harness();
    h.store.insert_coupon(percentage_coupon("SAVE10", 10, 50));
    let app = storefront::router(h.state);

    let (status, body, _) = send(&app, get("/api/coupons/validate?code=nope&amount=100")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "valid": false, "error": "Invalid coupon code" }));

    let (status, body, _) = send(&app, get("/api/coupons/validate?code=save10&amount=1000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["code"], "SAVE10");
    assert_eq!(body["discount_amount"].as_f64(), Some(50.0));

    let (status, _, _) = send(&app, get("/api/coupons/validate")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unconfigured_providers() {
    let h = harness_with(false, false);
    let user = h.state.tokens.issue_for(5, "shopper@example.com", Role::User).unwrap();
    let app = storefront::router(h.state);

    let (status, body, _) = send(&app, get("/api/shipping/calculate-rates?pickup_pin=110001&delivery_pin=411001")).await;
    assert_eq!(status, StatusCode::OK);
    let rates = body["rates"].as_array().unwrap();
    assert_eq!(rates.len(), 2);
    assert_eq!(rates[0]["courier_name"], "Standard Shipping");

    let req = with_token(post_json("/api/payments/create-intent", &json!({ "amount": 499 })), &user);
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _, _) = send(&app, post_json("/webhooks/razorpay", &json!({ "event": "payment.captured" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_carrier_rates_need_both_pins() {
    let h = harness();
    let app = storefront::router(h.state);
    let (status, body, _) = send(&app, get("/api/shipping/calculate-rates?pickup_pin=110001")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Pickup and delivery PIN codes required");
}

#[tokio::test]
async fn test_payment_webhook_signature() {
    let h = harness();
    let app = storefront::router(h.state);
    let body = json!({ "event": "payment.captured" });
    let raw = serde_json::to_vec(&body).unwrap();

    let req = Request::post("/webhooks/razorpay")
        .header("X-Razorpay-Signature", payment::sign("other", &raw))
        .body(Body::from(raw.clone()))
        .unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid webhook signature");

    let req = Request::post("/webhooks/razorpay")
        .header("X-Razorpay-Signature", payment::sign(WEBHOOK_SECRET, &raw))
        .body(Body::from(raw))
        .unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "received" }));
}

#[tokio::test]
async fn test_auth_routes_are_rate_limited() {
    let mut h = harness();
    let tight: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::per_minute(2));
    h.state.auth_limiter = tight;
    let app = storefront::router(h.state);

    for _ in 0..2 {
        let (status, _, _) = send(&app, post_json("/api/auth/logout", &json!({}))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body, _) = send(&app, post_json("/api/auth/logout", &json!({}))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded. Please try again later.");

    let (status, _, _) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let h = harness();
    h.store.insert_product(product(1, 1200, 4));
    let app = storefront::router(h.state);

    let truncated = Request::post("/api/orders")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"items": "#))
        .unwrap();
    let (status, body, headers) = send(&app, truncated).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

    let mut negative = order_request(&[(1, 1)]);
    negative["items"][0]["quantity"] = json!(-1);
    let (status, body, _) = send(&app, post_json("/api/orders", &negative)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body, _) = send(&app, get("/api/products/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid path parameter"));

    let (status, body, _) = send(&app, get("/api/shipping/calculate-rates?pickup_pin=110001&delivery_pin=411001&weight=heavy")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid query string"));
}

#[tokio::test]
async fn test_forwarded_for_does_not_reset_the_limit() {
    let mut h = harness();
    let tight: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::per_minute(2));
    h.state.auth_limiter = tight;
    let app = storefront::router(h.state);
    let peer: SocketAddr = "203.0.113.50:5000".parse().unwrap();

    let mut last = StatusCode::OK;
    for hop in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        let mut req = post_json("/api/auth/logout", &json!({}));
        req.headers_mut().insert("x-forwarded-for", hop.parse().unwrap());
        req.extensions_mut().insert(ConnectInfo(peer));
        last = send(&app, req).await.0;
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);
}

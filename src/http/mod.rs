//! HTTP surface: routing, middleware and request extractors.

pub mod extract;
pub mod handlers;
pub mod rate_limit;

use std::time::Duration;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;
use crate::config::AppConfig;
use crate::state::AppState;
use crate::ws;
use handlers::{account, catalog, coupons, notifications, orders, payments, reviews, shipping, webhooks, wishlist};
use rate_limit::{rate_limit, RateLimit};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for one request, taken from `X-Request-ID` or generated.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub fn router(state: AppState) -> Router {
    let auth = Router::new()
        .route("/register", post(account::register))
        .route("/login", post(account::login))
        .route("/logout", post(account::logout))
        .route("/refresh", post(account::refresh))
        .layer(middleware::from_fn_with_state(
            RateLimit::new(state.auth_limiter.clone(), &state.config.trusted_proxies),
            rate_limit,
        ));

    let api = Router::new()
        .route("/health", get(health))
        .nest("/auth", auth)
        .merge(public_routes())
        .merge(user_routes())
        .nest("/admin", admin_routes())
        .layer(middleware::from_fn_with_state(
            RateLimit::new(state.api_limiter.clone(), &state.config.trusted_proxies),
            rate_limit,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/webhooks/razorpay", post(webhooks::razorpay))
        .route("/webhooks/shiprocket", post(webhooks::shiprocket))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req.extensions().get::<RequestId>().map(|r| r.0.as_str()).unwrap_or("-");
            tracing::info_span!("http", method = %req.method(), path = %req.uri().path(), request_id = %request_id)
        }))
        .layer(middleware::from_fn(request_id))
        .layer(cors(&state.config))
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(catalog::list_products))
        .route("/products/search", get(catalog::search_products))
        .route("/products/:id", get(catalog::get_product))
        .route("/products/:id/reviews", get(reviews::product_reviews))
        .route("/filters", get(catalog::filter_options))
        .route("/categories", get(catalog::list_categories))
        .route("/catalogues", get(catalog::list_catalogues))
        .route("/catalogues/:id", get(catalog::get_catalogue))
        .route("/newsletter/subscribe", post(account::subscribe_newsletter))
        .route("/shipping/calculate-rates", get(shipping::calculate_rates))
        .route("/shipping/track/:awb", get(shipping::track_shipment))
        .route("/coupons/validate", get(coupons::validate))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/me", get(account::me).put(account::update_me))
        .route("/addresses", get(account::list_addresses).post(account::create_address))
        .route("/addresses/:id", put(account::update_address).delete(account::delete_address))
        .route("/orders", get(orders::list_my_orders).post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/tracking", get(orders::order_tracking))
        .route("/wishlist", get(wishlist::list).post(wishlist::add))
        .route("/wishlist/:product_id", delete(wishlist::remove))
        .route("/reviews", get(reviews::my_reviews).post(reviews::create_review))
        .route("/reviews/:id", put(reviews::update_review).delete(reviews::delete_review))
        .route("/notifications", get(notifications::inbox))
        .route("/notifications/:id/read", patch(notifications::mark_read))
        .route("/notifications/preferences", get(notifications::get_preferences).put(notifications::update_preferences))
        .route("/payments/create-intent", post(payments::create_intent))
        .route("/payments/verify", post(payments::verify_payment))
        .route("/payments/:payment_id/status", get(payments::payment_status))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/products", post(catalog::create_product))
        .route("/products/:id", put(catalog::update_product).delete(catalog::delete_product))
        .route("/categories", post(catalog::create_category))
        .route("/categories/:id", put(catalog::update_category).delete(catalog::delete_category))
        .route("/catalogues", post(catalog::create_catalogue))
        .route("/catalogues/:id", put(catalog::update_catalogue).delete(catalog::delete_catalogue))
        .route("/catalogues/:id/products", post(catalog::add_catalogue_products).delete(catalog::remove_catalogue_products))
        .route("/orders", get(orders::admin_list_orders))
        .route("/orders/:id/status", patch(orders::admin_update_status))
        .route("/orders/:id/ship", post(orders::admin_ship_order))
        .route("/payments/refund", post(payments::refund))
        .route("/coupons", get(coupons::list).post(coupons::create))
        .route("/coupons/:id", put(coupons::update).delete(coupons::delete))
        .route("/reviews", get(reviews::admin_list_reviews))
        .route("/reviews/:id/approve", patch(reviews::approve_review))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "storefront" }))
}

async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(id.clone()));
    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

/// Any origin in development, otherwise only the configured list.
pub fn cors(config: &AppConfig) -> CorsLayer {
    let origin = if config.is_development() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::CACHE_CONTROL,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .max_age(Duration::from_secs(86400))
}

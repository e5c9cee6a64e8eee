//! Provider callbacks. Both read the raw body so the signature covers exactly what was sent.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use crate::error::Result;
use crate::services::orders::{WebhookAck, PAYMENT_SIGNATURE_HEADER, SHIPPING_SIGNATURE_HEADER};
use crate::state::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn razorpay(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>> {
    let ack = s.orders.handle_payment_webhook(&body, header(&headers, PAYMENT_SIGNATURE_HEADER)).await?;
    Ok(Json(ack))
}

pub async fn shiprocket(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>> {
    let ack = s.orders.handle_shipping_webhook(&body, header(&headers, SHIPPING_SIGNATURE_HEADER)).await?;
    Ok(Json(ack))
}

//! Checkout payments and refunds.

use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;
use crate::domain::aggregates::Order;
use crate::error::{AppError, Result};
use crate::http::extract::{AdminUser, AppJson, AppPath, AuthUser};
use crate::services::orders::VerifyPaymentRequest;
use crate::services::payment::{self, GatewayPayment, GatewayRefund};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIntentRequest {
    /// Charges the stored total of this order; `amount` is ignored when set.
    pub order_id: Option<i64>,
    #[validate(custom = "crate::validation::price")]
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub receipt: Option<String>,
    #[serde(default)]
    pub notes: Value,
}

pub async fn create_intent(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<CreateIntentRequest>) -> Result<Json<Value>> {
    r.validate()?;
    if let Some(order_id) = r.order_id {
        return Ok(Json(s.orders.create_payment_for_order(order_id, user.caller(), r.notes).await?));
    }
    let gateway = s.payments.get()?;
    let amount = r.amount.filter(|a| *a > Decimal::ZERO)
        .ok_or_else(|| AppError::Validation("amount must be greater than zero".into()))?;
    let currency = r.currency.as_deref().unwrap_or("INR").trim().to_ascii_uppercase();
    if !payment::is_supported_currency(&currency) {
        return Err(AppError::Validation(format!("unsupported currency: {currency}")));
    }
    let receipt = r.receipt.filter(|r| !r.is_empty()).unwrap_or_else(payment::generate_receipt);
    let notes = if r.notes.is_object() { r.notes } else { json!({}) };
    let order = gateway.create_order(amount, &currency, &receipt, notes).await?;
    info!(user_id = user.id(), gateway_order_id = %order.id, "payment intent created");
    Ok(Json(json!({ "key_id": gateway.key_id(), "order": order })))
}

pub async fn verify_payment(State(s): State<AppState>, user: AuthUser, AppJson(r): AppJson<VerifyPaymentRequest>) -> Result<Json<Value>> {
    let payment_id = r.razorpay_payment_id.clone();
    let order: Order = s.orders.verify_payment(user.caller(), r).await?;
    Ok(Json(json!({
        "success": true,
        "order_id": order.id,
        "payment_id": payment_id,
        "status": order.payment_status,
    })))
}

pub async fn payment_status(State(s): State<AppState>, _user: AuthUser, AppPath(payment_id): AppPath<String>) -> Result<Json<GatewayPayment>> {
    if payment_id.trim().is_empty() {
        return Err(AppError::Validation("Payment ID required".into()));
    }
    Ok(Json(s.payments.get()?.fetch_payment(&payment_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(length(min = 1))]
    pub payment_id: String,
    #[validate(custom = "crate::validation::price")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: String,
}

pub async fn refund(State(s): State<AppState>, admin: AdminUser, AppJson(r): AppJson<RefundRequest>) -> Result<Json<GatewayRefund>> {
    r.validate()?;
    let refund = s.payments.get()?
        .refund(&r.payment_id, r.amount, json!({ "reason": r.reason }))
        .await?;
    info!(admin_id = admin.0.user_id, payment_id = %r.payment_id, refund_id = %refund.id, "refund issued");
    Ok(Json(refund))
}

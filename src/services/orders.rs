//! Order lifecycle: checkout, payment confirmation, fulfillment and cancellation.
//!
//! Label generation and cancellation touch remote providers between database
//! writes. Each completed step is persisted on the order (`fulfillment_step`,
//! `cancellation_step`) so a retried request resumes where the previous one
//! stopped instead of repeating a refund or a shipment.

use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use validator::Validate;
use crate::domain::aggregates::{
    CancellationStart, DraftLine, GatewayRefs, NewTransaction, Order, OrderDraft, OrderError, OrderPricing,
    OrderWithItems, PaymentApplied, PaymentOutcome, Product, ShippingSnapshot,
};
use crate::domain::events::OrderEventKind;
use crate::domain::value_objects::{CancellationStep, FulfillmentStep, OrderStatus, UnknownVariant};
use crate::error::{AppError, Result};
use crate::services::notifier::Notifier;
use crate::services::payment::{self, PaymentError, PaymentGateway};
use crate::services::shipping::{self, ShipmentRequest, ShippingCarrier};
use crate::services::Integration;
use crate::store::{OrderFilter, OrderStore, StoreError};

pub const DEFAULT_CURRENCY: &str = "INR";
pub const MAX_LINE_QUANTITY: u32 = 1000;
pub const PAYMENT_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";
pub const SHIPPING_SIGNATURE_HEADER: &str = "X-Shiprocket-Signature";

/// Who is acting on an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<i64>,
    pub is_admin: bool,
}

impl Caller {
    pub fn guest() -> Self { Self { user_id: None, is_admin: false } }
    pub fn user(user_id: i64) -> Self { Self { user_id: Some(user_id), is_admin: false } }
    pub fn admin(user_id: i64) -> Self { Self { user_id: Some(user_id), is_admin: true } }

    /// Admins see every order; customers only their own. Guest orders are admin-only.
    pub fn can_access(&self, order: &Order) -> bool {
        self.is_admin || self.user_id.is_some_and(|id| order.is_owned_by(id))
    }

    fn ensure_access(&self, order: &Order) -> Result<()> {
        if self.can_access(order) { Ok(()) } else { Err(AppError::Forbidden("Access denied".into())) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
    pub product_id: i64,
    pub quantity: u32,
    /// Client-side price; ignored in favour of the catalog price.
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub color: Option<String>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    #[validate]
    pub items: Vec<OrderLineRequest>,
    #[validate(length(min = 2, max = 255))]
    pub shipping_name: String,
    #[serde(default)]
    #[validate(custom = "crate::validation::email")]
    pub shipping_email: Option<String>,
    #[validate(length(min = 5, max = 500))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_city: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_state: String,
    #[validate(length(min = 1, max = 100))]
    pub shipping_country: String,
    #[validate(custom = "crate::validation::postal_code")]
    pub shipping_zip: String,
    #[validate(length(min = 1), custom = "crate::validation::phone")]
    pub shipping_phone: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Total shown to the customer; rejected when it disagrees with the recomputed one.
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    #[validate(custom = "crate::validation::non_negative")]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    #[validate(custom = "crate::validation::non_negative")]
    pub tax_amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    pub order_id: i64,
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShippingLabel {
    pub awb_number: String,
    pub shipment_id: i64,
    pub tracking_url: String,
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub status: &'static str,
}

impl WebhookAck {
    pub fn received() -> Self { Self { status: "received" } }
}

pub fn normalize_coupon_code(code: &str) -> String { code.trim().to_ascii_uppercase() }

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    payments: Integration<dyn PaymentGateway>,
    shipping: Integration<dyn ShippingCarrier>,
    notifier: Notifier,
    shipping_webhook_secret: Option<String>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        payments: Integration<dyn PaymentGateway>,
        shipping: Integration<dyn ShippingCarrier>,
        notifier: Notifier,
        shipping_webhook_secret: Option<String>,
    ) -> Self {
        Self { store, payments, shipping, notifier, shipping_webhook_secret }
    }

    #[instrument(skip(self, req), fields(user_id = ?user_id, lines = req.items.len()))]
    pub async fn create(&self, user_id: Option<i64>, req: CreateOrderRequest) -> Result<OrderWithItems> {
        req.validate()?;
        if let Some(line) = req.items.iter().find(|l| l.quantity == 0 || l.quantity > MAX_LINE_QUANTITY) {
            return Err(AppError::Validation(format!(
                "quantity for product {} must be between 1 and {MAX_LINE_QUANTITY}", line.product_id
            )));
        }
        let currency = req.currency.as_deref().map(str::trim).filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CURRENCY).to_ascii_uppercase();
        if !payment::is_supported_currency(&currency) {
            return Err(AppError::Validation(format!("unsupported currency: {currency}")));
        }

        let mut ids: Vec<i64> = req.items.iter().map(|l| l.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let products: HashMap<i64, Product> =
            self.store.products_by_ids(&ids).await?.into_iter().map(|p| (p.id, p)).collect();
        let mut lines = Vec::with_capacity(req.items.len());
        for line in &req.items {
            let product = products.get(&line.product_id).ok_or(StoreError::ProductNotFound(line.product_id))?;
            lines.push((product, line.quantity));
        }

        let coupon_code = req.coupon_code.as_deref().map(normalize_coupon_code).filter(|c| !c.is_empty());
        let coupon = match &coupon_code {
            Some(code) => Some(self.store.coupon_by_code(code).await?
                .ok_or_else(|| AppError::Validation("Invalid coupon code".into()))?),
            None => None,
        };

        let shipping_cost = req.shipping_cost.unwrap_or_default();
        let tax_amount = req.tax_amount.unwrap_or_default();
        let pricing = OrderPricing::compute(&lines, coupon.as_ref(), shipping_cost, tax_amount, Utc::now())?;
        if let Some(claimed) = req.total_amount {
            pricing.check_claimed_total(claimed)?;
        }

        let draft = OrderDraft {
            user_id,
            lines: req.items.iter().zip(&lines).map(|(line, (product, qty))| DraftLine {
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: *qty,
                unit_price: product.price,
                color: line.color.clone().unwrap_or_default(),
                size: line.size.clone().unwrap_or_default(),
            }).collect(),
            pricing,
            shipping_cost,
            tax_amount,
            currency,
            shipping: ShippingSnapshot {
                shipping_name: req.shipping_name.trim().to_string(),
                shipping_email: req.shipping_email.filter(|e| !e.is_empty()),
                shipping_address: req.shipping_address.trim().to_string(),
                shipping_city: req.shipping_city.trim().to_string(),
                shipping_state: req.shipping_state.trim().to_string(),
                shipping_country: req.shipping_country.trim().to_string(),
                shipping_zip: req.shipping_zip.trim().to_string(),
                shipping_phone: req.shipping_phone.trim().to_string(),
            },
            coupon_code,
            notes: req.notes.map(|n| crate::validation::sanitize(&n, 1000)).unwrap_or_default(),
        };

        let placed = self.store.place_order(draft).await?;
        info!(order_id = placed.order.id, total = %placed.order.total_amount, "order created");
        self.notifier.order_event(OrderEventKind::Created, &placed.order).await;
        Ok(placed)
    }

    pub async fn get(&self, order_id: i64, caller: Caller) -> Result<OrderWithItems> {
        let order = self.store.order(order_id).await?;
        caller.ensure_access(&order.order)?;
        Ok(order)
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(filter).await?)
    }

    /// Creates a gateway checkout order for an existing order, charging its stored total.
    #[instrument(skip(self, notes))]
    pub async fn create_payment_for_order(&self, order_id: i64, caller: Caller, notes: Value) -> Result<Value> {
        let gateway = self.payments.get()?;
        let order = self.store.order(order_id).await?.order;
        if order.user_id.is_some() { caller.ensure_access(&order)?; }
        let receipt = format!("ORD{order_id}");
        let mut notes = if notes.is_object() { notes } else { json!({}) };
        notes["order_id"] = json!(order_id);
        let checkout = gateway.create_order(order.total_amount, &order.currency, &receipt, notes).await?;
        self.store.attach_gateway_order(order_id, &checkout.id).await?;
        info!(order_id, gateway_order_id = %checkout.id, "checkout order created");
        Ok(json!({ "key_id": gateway.key_id(), "order": checkout }))
    }

    /// Confirms a checkout: the signature is checked before anything is read or written.
    #[instrument(skip(self, req), fields(order_id = req.order_id))]
    pub async fn verify_payment(&self, caller: Caller, req: VerifyPaymentRequest) -> Result<Order> {
        req.validate()?;
        let gateway = self.payments.get()?;
        if !gateway.verify_payment_signature(&req.razorpay_order_id, &req.razorpay_payment_id, &req.razorpay_signature) {
            warn!(order_id = req.order_id, "payment signature mismatch");
            return Err(PaymentError::InvalidSignature.into());
        }

        let order = self.store.order(req.order_id).await?.order;
        if order.user_id.is_some() { caller.ensure_access(&order)?; }
        if !order.accepts_gateway_order(&req.razorpay_order_id) {
            return Err(AppError::Validation("Payment does not belong to this order".into()));
        }

        let txn = NewTransaction::success(
            payment::PROVIDER, order.total_amount, &order.currency,
            &req.razorpay_payment_id, &req.razorpay_order_id, &req.razorpay_signature,
        );
        let refs = GatewayRefs {
            razorpay_order_id: Some(req.razorpay_order_id),
            razorpay_payment_id: Some(req.razorpay_payment_id),
            razorpay_signature: Some(req.razorpay_signature),
        };
        let (order, applied) = self.store.record_payment(order.id, refs, txn).await?;
        if applied == PaymentApplied::Recorded {
            info!(order_id = order.id, "payment verified");
            self.notifier.order_event(OrderEventKind::Paid, &order).await;
        }
        Ok(order)
    }

    #[instrument(skip_all)]
    pub async fn handle_payment_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookAck> {
        let gateway = self.payments.get()?;
        let signature = signature.filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("Missing signature".into()))?;
        if !gateway.verify_webhook_signature(body, signature) {
            warn!("payment webhook signature mismatch");
            return Err(AppError::Validation("Invalid webhook signature".into()));
        }
        let event: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {e}")))?;

        let payment = &event["payload"]["payment"];
        let outcome = match event["event"].as_str() {
            Some("payment.captured") => PaymentOutcome::Captured {
                payment_id: payment["entity"]["id"].as_str().map(str::to_string),
            },
            Some("payment.failed") => PaymentOutcome::Failed,
            other => {
                info!(event = ?other, "payment webhook ignored");
                return Ok(WebhookAck::received());
            }
        };
        let Some(gateway_order_id) = payment["entity"]["order_id"].as_str().or_else(|| payment["order_id"].as_str()) else {
            warn!("payment webhook without order id");
            return Ok(WebhookAck::received());
        };
        let Some(order) = self.store.order_by_gateway_order(gateway_order_id).await? else {
            info!(gateway_order_id, "payment webhook for unknown order");
            return Ok(WebhookAck::received());
        };

        let kind = match outcome {
            PaymentOutcome::Captured { .. } => OrderEventKind::Paid,
            PaymentOutcome::Failed => OrderEventKind::PaymentFailed,
        };
        let (order, changed) = self.store.apply_payment_outcome(order.id, outcome).await?;
        if changed {
            info!(order_id = order.id, status = %order.status, "payment webhook applied");
            self.notifier.order_event(kind, &order).await;
        } else {
            info!(order_id = order.id, status = %order.status, "payment webhook left order unchanged");
        }
        Ok(WebhookAck::received())
    }

    #[instrument(skip_all)]
    pub async fn handle_shipping_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookAck> {
        let secret = self.shipping_webhook_secret.as_deref()
            .ok_or_else(|| AppError::ServiceUnavailable("Shipping webhook is not configured".into()))?;
        let signature = signature.filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("Missing signature".into()))?;
        if !payment::verify_signature(secret, body, signature) {
            warn!("shipping webhook signature mismatch");
            return Err(AppError::Validation("Invalid webhook signature".into()));
        }
        let event: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {e}")))?;

        let awb = match &event["awb"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        let status = event["current_status"].as_str().or_else(|| event["shipment_status"].as_str()).unwrap_or_default();
        if awb.is_empty() || status.is_empty() {
            return Ok(WebhookAck::received());
        }
        let Some(order) = self.store.order_by_tracking_number(&awb).await? else {
            info!(awb = %awb, "shipping webhook for unknown shipment");
            return Ok(WebhookAck::received());
        };
        let (order, moved) = self.store.apply_carrier_status(order.id, status, Utc::now()).await?;
        if let Some(next) = moved {
            info!(order_id = order.id, awb = %awb, status = %next, "carrier status applied");
            self.notifier.status_changed(&order).await;
        }
        Ok(WebhookAck::received())
    }

    /// Creates the carrier shipment (once) and assigns an AWB for `courier_id`.
    #[instrument(skip(self))]
    pub async fn generate_label(&self, order_id: i64, courier_id: i64) -> Result<ShippingLabel> {
        let carrier = self.shipping.get()?;
        let current = self.store.order(order_id).await?;
        current.order.ensure_shippable()?;

        let shipment_id = match (current.order.fulfillment_step, current.order.shipment_id) {
            (Some(FulfillmentStep::ShipmentCreated), Some(id)) => {
                info!(order_id, shipment_id = id, "resuming label generation");
                id
            }
            _ => {
                let request = ShipmentRequest::for_order(&current, carrier.pickup_location());
                let created = carrier.create_shipment(&request).await?;
                self.store.record_shipment(order_id, created.shipment_id, created.carrier_order_id).await?;
                created.shipment_id
            }
        };

        let awb = carrier.assign_awb(shipment_id, courier_id).await?;
        let order = self.store.record_awb(order_id, &awb.awb_code, shipping::PROVIDER, Utc::now()).await?;
        info!(order_id, awb = %awb.awb_code, "shipping label generated");
        self.notifier.order_event(OrderEventKind::Processing, &order).await;

        Ok(ShippingLabel {
            tracking_url: shipping::tracking_url(&awb.awb_code),
            awb_number: awb.awb_code,
            shipment_id,
            order_status: order.status,
        })
    }

    /// Refund, carrier release, then stock restore and status change. Each step
    /// is recorded before the next begins; a completed cancellation is returned as is.
    ///
    /// A failed refund leaves the order in `cancellation_step = requested`, which
    /// also blocks label generation. Calling `cancel` again resumes from the refund.
    /// A payment that lands after the refund step is refunded on the next pass.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: i64, caller: Caller) -> Result<Order> {
        let current = self.store.order(order_id).await?;
        caller.ensure_access(&current.order)?;

        let (mut order, start) = self.store.begin_cancellation(order_id).await?;
        if start == CancellationStart::AlreadyCancelled {
            return Ok(order);
        }
        let reached = |order: &Order, step| order.cancellation_step.is_some_and(|s: CancellationStep| s.reached(step));

        if let Some(payment_id) = order.refundable_payment().map(str::to_string) {
            let gateway = self.payments.get()?;
            let refund = match gateway
                .refund(&payment_id, None, json!({ "reason": "Order cancelled", "order_id": order_id }))
                .await
            {
                Ok(refund) => refund,
                Err(e) => {
                    warn!(order_id, payment_id = %payment_id, error = %e, "refund failed; cancellation stays open until retried");
                    return Err(e.into());
                }
            };
            let txn = NewTransaction::refund(payment::PROVIDER, order.total_amount, &order.currency, &refund.id, "Order cancelled");
            order = self.store.record_refund(order_id, txn).await?;
            info!(order_id, refund_id = %refund.id, "payment refunded");
        }

        if !reached(&order, CancellationStep::ShipmentReleased) {
            if let Some(carrier_order_id) = order.carrier_order_id {
                match self.shipping.as_option() {
                    Some(carrier) => {
                        if let Err(e) = carrier.cancel_orders(&[carrier_order_id]).await {
                            warn!(order_id, carrier_order_id, error = %e, "carrier cancellation failed");
                        }
                    }
                    None => warn!(order_id, carrier_order_id, "carrier not configured; shipment left open"),
                }
            }
            self.store.advance_cancellation(order_id, CancellationStep::ShipmentReleased).await?;
        }

        let outcome = self.store.complete_cancellation(order_id).await?;
        if outcome.restored {
            info!(order_id, "order cancelled");
            self.notifier.order_event(OrderEventKind::Cancelled, &outcome.order).await;
        }
        Ok(outcome.order)
    }

    /// Admin status change; `cancelled` goes through the cancellation flow.
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: i64, status: &str, admin: Caller) -> Result<Order> {
        let status: OrderStatus = status.trim().parse().map_err(|e: UnknownVariant| AppError::Validation(e.to_string()))?;
        if status == OrderStatus::Cancelled {
            return self.cancel(order_id, admin).await;
        }
        let current = self.store.order(order_id).await?.order;
        if current.status == OrderStatus::Cancelled {
            return Err(OrderError::Closed(current.status).into());
        }
        let order = self.store.set_status(order_id, status, Utc::now()).await?;
        if current.status != order.status {
            self.notifier.status_changed(&order).await;
        }
        Ok(order)
    }

    pub async fn tracking(&self, order_id: i64, caller: Caller) -> Result<Value> {
        let order = self.store.order(order_id).await?.order;
        caller.ensure_access(&order)?;
        let mut body = json!({
            "order_id": order.id,
            "status": order.status,
            "tracking_number": order.tracking_number,
            "shipping_provider": order.shipping_provider,
            "estimated_delivery": order.estimated_delivery,
            "shipped_at": order.shipped_at,
            "delivered_at": order.delivered_at,
        });
        if let (Some(awb), Some(carrier)) = (order.tracking_number.as_deref(), self.shipping.as_option()) {
            match carrier.track(awb).await {
                Ok(live) => body["live_tracking"] = live,
                Err(e) => warn!(order_id, awb, error = %e, "live tracking unavailable"),
            }
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::sample_order;

    #[test]
    fn test_caller_access() {
        let order = sample_order(1, Some(5));
        assert!(Caller::user(5).can_access(&order));
        assert!(!Caller::user(6).can_access(&order));
        assert!(Caller::admin(1).can_access(&order));
        assert!(!Caller::guest().can_access(&order));

        let guest_order = sample_order(2, None);
        assert!(!Caller::user(5).can_access(&guest_order));
        assert!(Caller::admin(1).can_access(&guest_order));
    }

    #[test]
    fn test_create_request_validation() {
        let req: CreateOrderRequest = serde_json::from_value(json!({
            "items": [],
            "shipping_name": "A",
            "shipping_address": "12 MG Road",
            "shipping_city": "Pune",
            "shipping_state": "MH",
            "shipping_country": "India",
            "shipping_zip": "411001",
            "shipping_phone": "+919876543210",
        })).unwrap();
        let err = req.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("items"));
        assert!(fields.contains_key("shipping_name"));
        assert!(!fields.contains_key("shipping_zip"));
    }

    #[test]
    fn test_normalize_coupon_code() {
        assert_eq!(normalize_coupon_code(" save10 "), "SAVE10");
    }
}

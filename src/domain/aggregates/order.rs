//! Order Aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::{Coupon, CouponRejection, Product};
use crate::domain::value_objects::{CancellationStep, FulfillmentStep, OrderStatus, PaymentStatus};

/// Days added to the label date to produce the advertised delivery estimate.
pub const ESTIMATED_DELIVERY_DAYS: i64 = 7;
/// Largest tolerated gap between a client-claimed total and the recomputed one.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub id: i64,
    pub user_id: Option<i64>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub tax_amount: Decimal,
    pub currency: String,
    #[serde(flatten)]
    pub shipping: ShippingSnapshot,
    pub coupon_code: Option<String>,
    pub notes: String,
    #[serde(flatten)]
    pub gateway: GatewayRefs,
    pub shipping_provider: Option<String>,
    pub tracking_number: Option<String>,
    pub shipment_id: Option<i64>,
    pub carrier_order_id: Option<i64>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancellation_step: Option<CancellationStep>,
    pub fulfillment_step: Option<FulfillmentStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Address copied onto the order at checkout; never linked to a live address row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingSnapshot {
    pub shipping_name: String,
    pub shipping_email: Option<String>,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_country: String,
    pub shipping_zip: String,
    pub shipping_phone: String,
}

/// Identifiers issued by the payment gateway for this order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefs {
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub color: String,
    pub size: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Everything needed to persist a new order in one transaction.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub user_id: Option<i64>,
    pub lines: Vec<DraftLine>,
    pub pricing: OrderPricing,
    pub shipping_cost: Decimal,
    pub tax_amount: Decimal,
    pub currency: String,
    pub shipping: ShippingSnapshot,
    pub coupon_code: Option<String>,
    pub notes: String,
}

#[derive(Clone, Debug)]
pub struct DraftLine {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub color: String,
    pub size: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OrderPricing {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl OrderPricing {
    /// Recomputes totals from authoritative catalog prices.
    pub fn compute(
        lines: &[(&Product, u32)],
        coupon: Option<&Coupon>,
        shipping_cost: Decimal,
        tax_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, PricingError> {
        let subtotal: Decimal = lines.iter().map(|(p, qty)| p.price * Decimal::from(*qty)).sum();
        let discount = match coupon {
            Some(c) => c.redeem_for(subtotal, now).map_err(PricingError::Coupon)?,
            None => Decimal::ZERO,
        };
        let total = (subtotal - discount + shipping_cost + tax_amount).max(Decimal::ZERO);
        Ok(Self { subtotal, discount, total })
    }

    pub fn check_claimed_total(&self, claimed: Decimal) -> Result<(), PricingError> {
        if (claimed - self.total).abs() > TOTAL_TOLERANCE {
            return Err(PricingError::TotalMismatch { claimed, expected: self.total });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricingError {
    #[error("Order total {claimed} does not match computed total {expected}")]
    TotalMismatch { claimed: Decimal, expected: Decimal },
    #[error("{0}")]
    Coupon(CouponRejection),
}

/// Where a cancellation request should pick up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancellationStart {
    AlreadyCancelled,
    Resume(CancellationStep),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentApplied {
    Recorded,
    AlreadyRecorded,
}

/// Payment outcome reported asynchronously by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Captured { payment_id: Option<String> },
    Failed,
}

impl Order {
    pub fn is_owned_by(&self, user_id: i64) -> bool { self.user_id == Some(user_id) }

    pub fn begin_cancellation(&mut self) -> Result<CancellationStart, OrderError> {
        if self.status == OrderStatus::Cancelled {
            return Ok(CancellationStart::AlreadyCancelled);
        }
        if !self.status.is_cancellable() {
            return Err(OrderError::NotCancellable(self.status));
        }
        let step = *self.cancellation_step.get_or_insert(CancellationStep::Requested);
        self.touch();
        Ok(CancellationStart::Resume(step))
    }

    /// Gateway payment id to refund, when the order was paid through the gateway.
    pub fn refundable_payment(&self) -> Option<&str> {
        if self.payment_status != PaymentStatus::Paid { return None; }
        self.gateway.razorpay_payment_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn apply_refund(&mut self) {
        self.payment_status = PaymentStatus::Refunded;
        self.advance_cancellation(CancellationStep::RefundIssued);
    }

    pub fn advance_cancellation(&mut self, step: CancellationStep) {
        match self.cancellation_step {
            Some(current) if current.reached(step) => {}
            _ => { self.cancellation_step = Some(step); self.touch(); }
        }
    }

    /// Marks the order cancelled. Returns false when a previous call already did,
    /// in which case stock must not be restored again. A payment captured while
    /// the cancellation was running has to be refunded first.
    pub fn complete_cancellation(&mut self) -> Result<bool, OrderError> {
        if self.cancellation_step == Some(CancellationStep::Completed) { return Ok(false); }
        if self.refundable_payment().is_some() {
            return Err(OrderError::RefundPending);
        }
        self.status = OrderStatus::Cancelled;
        self.cancellation_step = Some(CancellationStep::Completed);
        self.touch();
        Ok(true)
    }

    /// Links a gateway checkout order so verification and webhooks can find this order.
    pub fn attach_gateway_order(&mut self, gateway_order_id: &str) -> Result<(), OrderError> {
        if self.status.is_closed() {
            return Err(OrderError::Closed(self.status));
        }
        if self.payment_status == PaymentStatus::Paid {
            return Err(OrderError::AlreadyPaid);
        }
        self.gateway.razorpay_order_id = Some(gateway_order_id.to_string());
        self.touch();
        Ok(())
    }

    /// A verification must name the checkout order attached to this order, if any.
    pub fn accepts_gateway_order(&self, gateway_order_id: &str) -> bool {
        self.gateway.razorpay_order_id.as_deref().map_or(true, |id| id == gateway_order_id)
    }

    pub fn mark_paid(&mut self, refs: GatewayRefs) -> Result<PaymentApplied, OrderError> {
        if self.status.is_closed() {
            return Err(OrderError::Closed(self.status));
        }
        if self.payment_status == PaymentStatus::Paid && self.gateway.razorpay_payment_id == refs.razorpay_payment_id {
            return Ok(PaymentApplied::AlreadyRecorded);
        }
        self.payment_status = PaymentStatus::Paid;
        if self.awaits_payment() { self.status = OrderStatus::Paid; }
        self.gateway = refs;
        self.touch();
        Ok(PaymentApplied::Recorded)
    }

    /// Applies a webhook-reported outcome. Returns whether anything changed.
    pub fn apply_payment_outcome(&mut self, outcome: PaymentOutcome) -> bool {
        if self.status.is_closed() { return false; }
        match outcome {
            PaymentOutcome::Captured { payment_id } => {
                if self.payment_status == PaymentStatus::Paid { return false; }
                self.payment_status = PaymentStatus::Paid;
                if let Some(id) = payment_id.filter(|id| !id.is_empty()) {
                    self.gateway.razorpay_payment_id = Some(id);
                }
                if self.awaits_payment() { self.status = OrderStatus::Paid; }
            }
            PaymentOutcome::Failed => {
                if matches!(self.payment_status, PaymentStatus::Paid | PaymentStatus::Failed) { return false; }
                self.payment_status = PaymentStatus::Failed;
                if self.awaits_payment() { self.status = OrderStatus::PaymentFailed; }
            }
        }
        self.touch();
        true
    }

    fn awaits_payment(&self) -> bool {
        matches!(self.status, OrderStatus::PendingPayment | OrderStatus::Confirmed | OrderStatus::PaymentFailed | OrderStatus::Paid)
    }

    pub fn ensure_shippable(&self) -> Result<(), OrderError> {
        if self.status.is_closed() || self.cancellation_step.is_some() {
            return Err(OrderError::Closed(self.status));
        }
        if self.payment_status != PaymentStatus::Paid {
            return Err(OrderError::NotPaid);
        }
        if self.fulfillment_step == Some(FulfillmentStep::AwbAssigned) {
            return Err(OrderError::LabelExists);
        }
        Ok(())
    }

    pub fn record_shipment(&mut self, shipment_id: i64, carrier_order_id: Option<i64>) {
        self.shipment_id = Some(shipment_id);
        self.carrier_order_id = carrier_order_id;
        self.fulfillment_step = Some(FulfillmentStep::ShipmentCreated);
        self.touch();
    }

    pub fn record_awb(&mut self, awb: &str, provider: &str, now: DateTime<Utc>) {
        self.tracking_number = Some(awb.to_string());
        self.shipping_provider = Some(provider.to_string());
        self.status = OrderStatus::Processing;
        self.estimated_delivery = Some(now + Duration::days(ESTIMATED_DELIVERY_DAYS));
        self.fulfillment_step = Some(FulfillmentStep::AwbAssigned);
        self.touch();
    }

    /// Admin status override; stamps shipped/delivered times.
    pub fn set_status(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            OrderStatus::Shipped => self.shipped_at = Some(now),
            OrderStatus::Delivered => self.delivered_at = Some(now),
            _ => {}
        }
        self.touch();
    }

    /// Moves the order forward from a carrier status; never moves it back.
    pub fn apply_carrier_status(&mut self, carrier_status: &str, now: DateTime<Utc>) -> Option<OrderStatus> {
        if self.status.is_closed() || self.status == OrderStatus::Delivered { return None; }
        let next = carrier_status_to_order_status(carrier_status)?;
        if next == self.status { return None; }
        if next == OrderStatus::Delivered && self.shipped_at.is_none() { self.shipped_at = Some(now); }
        self.set_status(next, now);
        Some(next)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

pub fn carrier_status_to_order_status(carrier_status: &str) -> Option<OrderStatus> {
    match carrier_status.trim().to_ascii_uppercase().as_str() {
        "DELIVERED" => Some(OrderStatus::Delivered),
        "SHIPPED" | "PICKED UP" | "IN TRANSIT" | "OUT FOR DELIVERY" | "REACHED AT DESTINATION HUB" => Some(OrderStatus::Shipped),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Cannot cancel {0} order")]
    NotCancellable(OrderStatus),
    #[error("Order is {0}")]
    Closed(OrderStatus),
    #[error("Order must be paid before generating shipping label")]
    NotPaid,
    #[error("Shipping label already generated")]
    LabelExists,
    #[error("Order is already paid")]
    AlreadyPaid,
    #[error("Payment received during cancellation has not been refunded")]
    RefundPending,
}

#[cfg(test)]
pub(crate) fn sample_order(id: i64, user_id: Option<i64>) -> Order {
    let now = Utc::now();
    Order {
        id, user_id, status: OrderStatus::PendingPayment, payment_status: PaymentStatus::Pending,
        total_amount: Decimal::new(1000, 0), discount_amount: Decimal::ZERO, shipping_cost: Decimal::ZERO,
        tax_amount: Decimal::ZERO, currency: "INR".into(), shipping: ShippingSnapshot::default(), coupon_code: None,
        notes: String::new(), gateway: GatewayRefs::default(), shipping_provider: None, tracking_number: None,
        shipment_id: None, carrier_order_id: None, estimated_delivery: None, shipped_at: None, delivered_at: None,
        cancellation_step: None, fulfillment_step: None, created_at: now, updated_at: now,
    }
}

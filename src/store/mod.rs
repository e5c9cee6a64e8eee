//! Order lifecycle persistence.
//!
//! Every mutation loads the order under a lock, applies the domain rule from
//! [`Order`] and writes the result back in the same unit of work, so the
//! guards in the aggregate are the only place transitions are decided.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use crate::domain::aggregates::{
    CancellationStart, Coupon, CouponRejection, GatewayRefs, NewNotification, NewTransaction, Order, OrderDraft,
    OrderError, OrderWithItems, PaymentApplied, PaymentOutcome, PaymentTransaction, Product,
};
use crate::domain::value_objects::{CancellationStep, OrderStatus, PaymentStatus};
use crate::validation::Pagination;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Product {0} not found")]
    ProductNotFound(i64),
    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: i64, product: String, available: i32, requested: u32 },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Coupon(#[from] CouponRejection),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub user_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Matches the order id or the shipping name.
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<Pagination>,
}

impl OrderFilter {
    pub fn for_user(user_id: i64) -> Self { Self { user_id: Some(user_id), ..Self::default() } }

    pub fn matches(&self, order: &Order) -> bool {
        if self.user_id.is_some() && order.user_id != self.user_id { return false; }
        if self.status.is_some_and(|s| s != order.status) { return false; }
        if self.payment_status.is_some_and(|s| s != order.payment_status) { return false; }
        if self.from.is_some_and(|from| order.created_at < from) { return false; }
        if self.to.is_some_and(|to| order.created_at > to) { return false; }
        match self.search.as_deref() {
            Some(term) if !term.is_empty() => {
                order.id.to_string() == term || order.shipping.shipping_name.to_lowercase().contains(&term.to_lowercase())
            }
            _ => true,
        }
    }
}

/// Result of finishing a cancellation; `restored` is false when stock had
/// already been put back by an earlier attempt.
#[derive(Clone, Debug)]
pub struct CancellationOutcome {
    pub order: Order,
    pub restored: bool,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, StoreError>;
    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, StoreError>;

    /// Decrements stock, consumes the coupon and inserts the order with its
    /// items atomically. Nothing is written when any line fails.
    async fn place_order(&self, draft: OrderDraft) -> Result<OrderWithItems, StoreError>;

    async fn order(&self, id: i64) -> Result<OrderWithItems, StoreError>;
    async fn order_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<Order>, StoreError>;
    async fn order_by_tracking_number(&self, awb: &str) -> Result<Option<Order>, StoreError>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    async fn attach_gateway_order(&self, order_id: i64, gateway_order_id: &str) -> Result<Order, StoreError>;
    /// Marks the order paid and appends `txn` unless the same payment was already recorded.
    async fn record_payment(&self, order_id: i64, refs: GatewayRefs, txn: NewTransaction) -> Result<(Order, PaymentApplied), StoreError>;
    async fn apply_payment_outcome(&self, order_id: i64, outcome: PaymentOutcome) -> Result<(Order, bool), StoreError>;

    async fn record_shipment(&self, order_id: i64, shipment_id: i64, carrier_order_id: Option<i64>) -> Result<Order, StoreError>;
    async fn record_awb(&self, order_id: i64, awb: &str, provider: &str, now: DateTime<Utc>) -> Result<Order, StoreError>;
    async fn set_status(&self, order_id: i64, status: OrderStatus, now: DateTime<Utc>) -> Result<Order, StoreError>;
    async fn apply_carrier_status(&self, order_id: i64, carrier_status: &str, now: DateTime<Utc>) -> Result<(Order, Option<OrderStatus>), StoreError>;

    async fn begin_cancellation(&self, order_id: i64) -> Result<(Order, CancellationStart), StoreError>;
    async fn record_refund(&self, order_id: i64, txn: NewTransaction) -> Result<Order, StoreError>;
    async fn advance_cancellation(&self, order_id: i64, step: CancellationStep) -> Result<Order, StoreError>;
    /// Restores stock and marks the order cancelled in one unit, at most once.
    async fn complete_cancellation(&self, order_id: i64) -> Result<CancellationOutcome, StoreError>;

    async fn transactions(&self, order_id: i64) -> Result<Vec<PaymentTransaction>, StoreError>;
    async fn push_notification(&self, notification: NewNotification) -> Result<(), StoreError>;
}

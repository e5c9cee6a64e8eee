//! In-process store used by tests and local demos.

use std::collections::{BTreeMap, HashMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use super::{CancellationOutcome, OrderFilter, OrderStore, StoreError};
use crate::domain::aggregates::{
    CancellationStart, Coupon, GatewayRefs, NewNotification, NewTransaction, Notification, Order, OrderDraft,
    OrderItem, OrderWithItems, PaymentApplied, PaymentOutcome, PaymentTransaction, Product,
};
use crate::domain::value_objects::{CancellationStep, OrderStatus, PaymentStatus};

#[derive(Default)]
struct Inner {
    products: BTreeMap<i64, Product>,
    coupons: HashMap<String, Coupon>,
    orders: BTreeMap<i64, Order>,
    items: Vec<OrderItem>,
    transactions: Vec<PaymentTransaction>,
    notifications: Vec<Notification>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 { self.next_id += 1; self.next_id }
    fn items_of(&self, order_id: i64) -> Vec<OrderItem> {
        self.items.iter().filter(|i| i.order_id == order_id).cloned().collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert_product(&self, product: Product) { self.inner.lock().products.insert(product.id, product); }
    pub fn product(&self, id: i64) -> Option<Product> { self.inner.lock().products.get(&id).cloned() }
    pub fn insert_coupon(&self, coupon: Coupon) { self.inner.lock().coupons.insert(coupon.code.clone(), coupon); }
    pub fn coupon(&self, code: &str) -> Option<Coupon> { self.inner.lock().coupons.get(code).cloned() }
    pub fn notifications(&self) -> Vec<Notification> { self.inner.lock().notifications.clone() }

    /// Applies `f` to a copy of the order and keeps the copy only when `f` succeeds.
    fn update<R>(&self, order_id: i64, f: impl FnOnce(&mut Order) -> Result<R, StoreError>) -> Result<(Order, R), StoreError> {
        let mut inner = self.inner.lock();
        let current = inner.orders.get(&order_id).ok_or(StoreError::NotFound("Order"))?;
        let mut next = current.clone();
        let result = f(&mut next)?;
        inner.orders.insert(order_id, next.clone());
        Ok((next, result))
    }

    fn append(inner: &mut Inner, order_id: i64, txn: NewTransaction) {
        let id = inner.next_id();
        inner.transactions.push(PaymentTransaction {
            id, order_id, provider: txn.provider, amount: txn.amount, currency: txn.currency, status: txn.status,
            transaction_id: txn.transaction_id, order_id_ext: txn.order_id_ext, signature: txn.signature,
            failure_reason: txn.failure_reason, metadata: txn.metadata, created_at: Utc::now(),
        });
    }
}

fn new_order(id: i64, draft: &OrderDraft, now: DateTime<Utc>) -> Order {
    Order {
        id,
        user_id: draft.user_id,
        status: OrderStatus::PendingPayment,
        payment_status: PaymentStatus::Pending,
        total_amount: draft.pricing.total,
        discount_amount: draft.pricing.discount,
        shipping_cost: draft.shipping_cost,
        tax_amount: draft.tax_amount,
        currency: draft.currency.clone(),
        shipping: draft.shipping.clone(),
        coupon_code: draft.coupon_code.clone(),
        notes: draft.notes.clone(),
        gateway: GatewayRefs::default(),
        shipping_provider: None,
        tracking_number: None,
        shipment_id: None,
        carrier_order_id: None,
        estimated_delivery: None,
        shipped_at: None,
        delivered_at: None,
        cancellation_step: None,
        fulfillment_step: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, StoreError> {
        let inner = self.inner.lock();
        Ok(ids.iter().filter_map(|id| inner.products.get(id)).filter(|p| p.is_active).cloned().collect())
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(self.inner.lock().coupons.get(code).cloned())
    }

    async fn place_order(&self, draft: OrderDraft) -> Result<OrderWithItems, StoreError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        let mut touched: BTreeMap<i64, Product> = BTreeMap::new();
        for line in &draft.lines {
            if !touched.contains_key(&line.product_id) {
                let p = inner.products.get(&line.product_id).filter(|p| p.is_active)
                    .ok_or(StoreError::ProductNotFound(line.product_id))?;
                touched.insert(line.product_id, p.clone());
            }
            let product = touched.get_mut(&line.product_id).ok_or(StoreError::ProductNotFound(line.product_id))?;
            if product.remove_inventory(line.quantity).is_err() {
                return Err(StoreError::InsufficientStock {
                    product_id: product.id, product: product.name.clone(), available: product.stock, requested: line.quantity,
                });
            }
        }

        let coupon = match draft.coupon_code.as_deref() {
            Some(code) => {
                let mut coupon = inner.coupons.get(code).cloned().ok_or(StoreError::NotFound("Coupon"))?;
                coupon.check_at(now)?;
                coupon.used_count += 1;
                Some(coupon)
            }
            None => None,
        };

        inner.products.extend(touched);
        if let Some(coupon) = coupon { inner.coupons.insert(coupon.code.clone(), coupon); }

        let order = new_order(inner.next_id(), &draft, now);
        let mut items = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let item = OrderItem {
                id: inner.next_id(), order_id: order.id, product_id: line.product_id, product_name: line.product_name.clone(),
                quantity: line.quantity as i32, price: line.unit_price, color: line.color.clone(), size: line.size.clone(),
            };
            inner.items.push(item.clone());
            items.push(item);
        }
        inner.orders.insert(order.id, order.clone());
        Ok(OrderWithItems { order, items })
    }

    async fn order(&self, id: i64) -> Result<OrderWithItems, StoreError> {
        let inner = self.inner.lock();
        let order = inner.orders.get(&id).cloned().ok_or(StoreError::NotFound("Order"))?;
        Ok(OrderWithItems { items: inner.items_of(id), order })
    }

    async fn order_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.orders.values().find(|o| o.gateway.razorpay_order_id.as_deref() == Some(gateway_order_id)).cloned())
    }

    async fn order_by_tracking_number(&self, awb: &str) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.orders.values().find(|o| o.tracking_number.as_deref() == Some(awb)).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock();
        let matching = inner.orders.values().rev().filter(|o| filter.matches(o)).cloned();
        Ok(match filter.page {
            Some(page) => matching.skip(page.offset() as usize).take(page.limit as usize).collect(),
            None => matching.collect(),
        })
    }

    async fn attach_gateway_order(&self, order_id: i64, gateway_order_id: &str) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| Ok(o.attach_gateway_order(gateway_order_id)?))?.0)
    }

    async fn record_payment(&self, order_id: i64, refs: GatewayRefs, txn: NewTransaction) -> Result<(Order, PaymentApplied), StoreError> {
        let (order, applied) = self.update(order_id, |o| Ok(o.mark_paid(refs)?))?;
        if applied == PaymentApplied::Recorded {
            Self::append(&mut self.inner.lock(), order_id, txn);
        }
        Ok((order, applied))
    }

    async fn apply_payment_outcome(&self, order_id: i64, outcome: PaymentOutcome) -> Result<(Order, bool), StoreError> {
        self.update(order_id, |o| Ok(o.apply_payment_outcome(outcome)))
    }

    async fn record_shipment(&self, order_id: i64, shipment_id: i64, carrier_order_id: Option<i64>) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.record_shipment(shipment_id, carrier_order_id); Ok(()) })?.0)
    }

    async fn record_awb(&self, order_id: i64, awb: &str, provider: &str, now: DateTime<Utc>) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.record_awb(awb, provider, now); Ok(()) })?.0)
    }

    async fn set_status(&self, order_id: i64, status: OrderStatus, now: DateTime<Utc>) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.set_status(status, now); Ok(()) })?.0)
    }

    async fn apply_carrier_status(&self, order_id: i64, carrier_status: &str, now: DateTime<Utc>) -> Result<(Order, Option<OrderStatus>), StoreError> {
        self.update(order_id, |o| Ok(o.apply_carrier_status(carrier_status, now)))
    }

    async fn begin_cancellation(&self, order_id: i64) -> Result<(Order, CancellationStart), StoreError> {
        self.update(order_id, |o| Ok(o.begin_cancellation()?))
    }

    async fn record_refund(&self, order_id: i64, txn: NewTransaction) -> Result<Order, StoreError> {
        let (order, _) = self.update(order_id, |o| { o.apply_refund(); Ok(()) })?;
        Self::append(&mut self.inner.lock(), order_id, txn);
        Ok(order)
    }

    async fn advance_cancellation(&self, order_id: i64, step: CancellationStep) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.advance_cancellation(step); Ok(()) })?.0)
    }

    async fn complete_cancellation(&self, order_id: i64) -> Result<CancellationOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let order = inner.orders.get_mut(&order_id).ok_or(StoreError::NotFound("Order"))?;
        let restored = order.complete_cancellation()?;
        let order = order.clone();
        if restored {
            for item in inner.items_of(order_id) {
                if let Some(product) = inner.products.get_mut(&item.product_id) {
                    product.add_inventory(item.quantity.max(0) as u32);
                }
            }
        }
        Ok(CancellationOutcome { order, restored })
    }

    async fn transactions(&self, order_id: i64) -> Result<Vec<PaymentTransaction>, StoreError> {
        Ok(self.inner.lock().transactions.iter().filter(|t| t.order_id == order_id).cloned().collect())
    }

    async fn push_notification(&self, n: NewNotification) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        inner.notifications.push(Notification {
            id, user_id: n.user_id, kind: n.kind, channel: "in_app".into(), title: n.title, message: n.message,
            data: n.data, status: "sent".into(), read_at: None, created_at: Utc::now(),
        });
        Ok(())
    }
}

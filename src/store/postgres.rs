//! Postgres-backed order store.

use std::collections::BTreeMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use super::{CancellationOutcome, OrderFilter, OrderStore, StoreError};
use crate::domain::aggregates::{
    CancellationStart, Coupon, GatewayRefs, NewNotification, NewTransaction, Order, OrderDraft, OrderItem,
    OrderWithItems, PaymentApplied, PaymentOutcome, PaymentTransaction, Product, ShippingSnapshot,
};
use crate::domain::value_objects::{CancellationStep, OrderStatus, UnknownVariant};

pub const ORDER_COLUMNS: &str = "id, user_id, status, payment_status, total_amount, discount_amount, shipping_cost, \
    tax_amount, currency, shipping_name, shipping_email, shipping_address, shipping_city, shipping_state, \
    shipping_country, shipping_zip, shipping_phone, coupon_code, notes, razorpay_order_id, razorpay_payment_id, \
    razorpay_signature, shipping_provider, tracking_number, shipment_id, carrier_order_id, estimated_delivery, \
    shipped_at, delivered_at, cancellation_step, fulfillment_step, created_at, updated_at";

pub const PRODUCT_COLUMNS: &str = "id, name, price, description, image, category_id, colors, sizes, stock, \
    is_featured, is_active, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: Option<i64>,
    status: String,
    payment_status: String,
    total_amount: Decimal,
    discount_amount: Decimal,
    shipping_cost: Decimal,
    tax_amount: Decimal,
    currency: String,
    shipping_name: String,
    shipping_email: Option<String>,
    shipping_address: String,
    shipping_city: String,
    shipping_state: String,
    shipping_country: String,
    shipping_zip: String,
    shipping_phone: String,
    coupon_code: Option<String>,
    notes: String,
    razorpay_order_id: Option<String>,
    razorpay_payment_id: Option<String>,
    razorpay_signature: Option<String>,
    shipping_provider: Option<String>,
    tracking_number: Option<String>,
    shipment_id: Option<i64>,
    carrier_order_id: Option<i64>,
    estimated_delivery: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancellation_step: Option<String>,
    fulfillment_step: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = UnknownVariant;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: r.id,
            user_id: r.user_id,
            status: r.status.parse()?,
            payment_status: r.payment_status.parse()?,
            total_amount: r.total_amount,
            discount_amount: r.discount_amount,
            shipping_cost: r.shipping_cost,
            tax_amount: r.tax_amount,
            currency: r.currency,
            shipping: ShippingSnapshot {
                shipping_name: r.shipping_name,
                shipping_email: r.shipping_email,
                shipping_address: r.shipping_address,
                shipping_city: r.shipping_city,
                shipping_state: r.shipping_state,
                shipping_country: r.shipping_country,
                shipping_zip: r.shipping_zip,
                shipping_phone: r.shipping_phone,
            },
            coupon_code: r.coupon_code,
            notes: r.notes,
            gateway: GatewayRefs {
                razorpay_order_id: r.razorpay_order_id,
                razorpay_payment_id: r.razorpay_payment_id,
                razorpay_signature: r.razorpay_signature,
            },
            shipping_provider: r.shipping_provider,
            tracking_number: r.tracking_number,
            shipment_id: r.shipment_id,
            carrier_order_id: r.carrier_order_id,
            estimated_delivery: r.estimated_delivery,
            shipped_at: r.shipped_at,
            delivered_at: r.delivered_at,
            cancellation_step: r.cancellation_step.map(|s| s.parse()).transpose()?,
            fulfillment_step: r.fulfillment_step.map(|s| s.parse()).transpose()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn decode(row: OrderRow) -> Result<Order, StoreError> {
    Order::try_from(row).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Runs `f` against the row-locked order and persists the result in the same transaction.
    async fn update<R: Send>(
        &self,
        order_id: i64,
        f: impl FnOnce(&mut Order) -> Result<R, StoreError> + Send,
    ) -> Result<(Order, R), StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        let result = f(&mut order)?;
        write_order(&mut tx, &order).await?;
        tx.commit().await?;
        Ok((order, result))
    }
}

async fn lock_order(conn: &mut PgConnection, order_id: i64) -> Result<Order, StoreError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::NotFound("Order"))?;
    decode(row)
}

/// Persists the mutable lifecycle columns of `order`.
async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE orders SET status = $2, payment_status = $3, razorpay_order_id = $4, razorpay_payment_id = $5, \
         razorpay_signature = $6, shipping_provider = $7, tracking_number = $8, shipment_id = $9, \
         carrier_order_id = $10, estimated_delivery = $11, shipped_at = $12, delivered_at = $13, \
         cancellation_step = $14, fulfillment_step = $15, updated_at = $16 WHERE id = $1",
    )
    .bind(order.id)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(&order.gateway.razorpay_order_id)
    .bind(&order.gateway.razorpay_payment_id)
    .bind(&order.gateway.razorpay_signature)
    .bind(&order.shipping_provider)
    .bind(&order.tracking_number)
    .bind(order.shipment_id)
    .bind(order.carrier_order_id)
    .bind(order.estimated_delivery)
    .bind(order.shipped_at)
    .bind(order.delivered_at)
    .bind(order.cancellation_step.map(|s| s.as_str()))
    .bind(order.fulfillment_step.map(|s| s.as_str()))
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_transaction(conn: &mut PgConnection, order_id: i64, txn: &NewTransaction) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO payment_transactions (order_id, provider, amount, currency, status, transaction_id, \
         order_id_ext, signature, failure_reason, metadata) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(order_id)
    .bind(&txn.provider)
    .bind(txn.amount)
    .bind(&txn.currency)
    .bind(txn.status.as_str())
    .bind(&txn.transaction_id)
    .bind(&txn.order_id_ext)
    .bind(&txn.signature)
    .bind(&txn.failure_reason)
    .bind(&txn.metadata)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, StoreError> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) AND is_active AND deleted_at IS NULL"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn place_order(&self, draft: OrderDraft) -> Result<OrderWithItems, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut ids: Vec<i64> = draft.lines.iter().map(|l| l.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        // Locked in id order so concurrent checkouts cannot deadlock on each other.
        let rows: Vec<(i64, String, i32)> = sqlx::query_as(
            "SELECT id, name, stock FROM products WHERE id = ANY($1) AND is_active AND deleted_at IS NULL ORDER BY id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;
        let mut stock: BTreeMap<i64, (String, i32)> = rows.into_iter().map(|(id, name, s)| (id, (name, s))).collect();

        for line in &draft.lines {
            let (name, available) = stock.get_mut(&line.product_id).ok_or(StoreError::ProductNotFound(line.product_id))?;
            if i64::from(*available) < i64::from(line.quantity) {
                return Err(StoreError::InsufficientStock {
                    product_id: line.product_id, product: name.clone(), available: *available, requested: line.quantity,
                });
            }
            *available -= line.quantity as i32;
        }
        for (id, (_, left)) in &stock {
            sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(left)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(code) = draft.coupon_code.as_deref() {
            let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = $1 FOR UPDATE")
                .bind(code)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound("Coupon"))?;
            coupon.check_at(Utc::now())?;
            sqlx::query("UPDATE coupons SET used_count = used_count + 1, updated_at = NOW() WHERE id = $1")
                .bind(coupon.id)
                .execute(&mut *tx)
                .await?;
        }

        let s = &draft.shipping;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (user_id, status, payment_status, total_amount, discount_amount, shipping_cost, \
             tax_amount, currency, shipping_name, shipping_email, shipping_address, shipping_city, shipping_state, \
             shipping_country, shipping_zip, shipping_phone, coupon_code, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(draft.user_id)
        .bind(OrderStatus::PendingPayment.as_str())
        .bind("pending")
        .bind(draft.pricing.total)
        .bind(draft.pricing.discount)
        .bind(draft.shipping_cost)
        .bind(draft.tax_amount)
        .bind(&draft.currency)
        .bind(&s.shipping_name)
        .bind(&s.shipping_email)
        .bind(&s.shipping_address)
        .bind(&s.shipping_city)
        .bind(&s.shipping_state)
        .bind(&s.shipping_country)
        .bind(&s.shipping_zip)
        .bind(&s.shipping_phone)
        .bind(&draft.coupon_code)
        .bind(&draft.notes)
        .fetch_one(&mut *tx)
        .await?;
        let order = decode(row)?;

        let mut items = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let item = sqlx::query_as::<_, OrderItem>(
                "INSERT INTO order_items (order_id, product_id, product_name, quantity, price, color, size) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
            )
            .bind(order.id)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(line.quantity as i32)
            .bind(line.unit_price)
            .bind(&line.color)
            .bind(&line.size)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item);
        }

        tx.commit().await?;
        debug!(order_id = order.id, items = items.len(), "order persisted");
        Ok(OrderWithItems { order, items })
    }

    async fn order(&self, id: i64) -> Result<OrderWithItems, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Order"))?;
        let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(OrderWithItems { order: decode(row)?, items })
    }

    async fn order_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE razorpay_order_id = $1"))
            .bind(gateway_order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(decode)
            .transpose()
    }

    async fn order_by_tracking_number(&self, awb: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE tracking_number = $1"))
            .bind(awb)
            .fetch_optional(&self.pool)
            .await?
            .map(decode)
            .transpose()
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = filter.payment_status {
            qb.push(" AND payment_status = ").push_bind(payment_status.as_str());
        }
        if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
            qb.push(" AND (CAST(id AS TEXT) = ").push_bind(term.to_string())
                .push(" OR shipping_name ILIKE ").push_bind(format!("%{term}%"))
                .push(")");
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
        qb.push(" ORDER BY created_at DESC, id DESC");
        if let Some(page) = filter.page {
            qb.push(" LIMIT ").push_bind(page.limit).push(" OFFSET ").push_bind(page.offset());
        }
        let rows = qb.build_query_as::<OrderRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(decode).collect()
    }

    async fn attach_gateway_order(&self, order_id: i64, gateway_order_id: &str) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| Ok(o.attach_gateway_order(gateway_order_id)?)).await?.0)
    }

    async fn record_payment(&self, order_id: i64, refs: GatewayRefs, txn: NewTransaction) -> Result<(Order, PaymentApplied), StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        let applied = order.mark_paid(refs)?;
        if applied == PaymentApplied::Recorded {
            write_order(&mut tx, &order).await?;
            insert_transaction(&mut tx, order_id, &txn).await?;
        }
        tx.commit().await?;
        Ok((order, applied))
    }

    async fn apply_payment_outcome(&self, order_id: i64, outcome: PaymentOutcome) -> Result<(Order, bool), StoreError> {
        self.update(order_id, |o| Ok(o.apply_payment_outcome(outcome))).await
    }

    async fn record_shipment(&self, order_id: i64, shipment_id: i64, carrier_order_id: Option<i64>) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.record_shipment(shipment_id, carrier_order_id); Ok(()) }).await?.0)
    }

    async fn record_awb(&self, order_id: i64, awb: &str, provider: &str, now: DateTime<Utc>) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.record_awb(awb, provider, now); Ok(()) }).await?.0)
    }

    async fn set_status(&self, order_id: i64, status: OrderStatus, now: DateTime<Utc>) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.set_status(status, now); Ok(()) }).await?.0)
    }

    async fn apply_carrier_status(&self, order_id: i64, carrier_status: &str, now: DateTime<Utc>) -> Result<(Order, Option<OrderStatus>), StoreError> {
        self.update(order_id, |o| Ok(o.apply_carrier_status(carrier_status, now))).await
    }

    async fn begin_cancellation(&self, order_id: i64) -> Result<(Order, CancellationStart), StoreError> {
        self.update(order_id, |o| Ok(o.begin_cancellation()?)).await
    }

    async fn record_refund(&self, order_id: i64, txn: NewTransaction) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        order.apply_refund();
        write_order(&mut tx, &order).await?;
        insert_transaction(&mut tx, order_id, &txn).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn advance_cancellation(&self, order_id: i64, step: CancellationStep) -> Result<Order, StoreError> {
        Ok(self.update(order_id, |o| { o.advance_cancellation(step); Ok(()) }).await?.0)
    }

    async fn complete_cancellation(&self, order_id: i64) -> Result<CancellationOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        let restored = order.complete_cancellation()?;
        if restored {
            sqlx::query(
                "UPDATE products p SET stock = p.stock + s.qty, updated_at = NOW() \
                 FROM (SELECT product_id, SUM(quantity)::INT AS qty FROM order_items WHERE order_id = $1 GROUP BY product_id) s \
                 WHERE p.id = s.product_id",
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
            write_order(&mut tx, &order).await?;
        }
        tx.commit().await?;
        Ok(CancellationOutcome { order, restored })
    }

    async fn transactions(&self, order_id: i64) -> Result<Vec<PaymentTransaction>, StoreError> {
        Ok(sqlx::query_as::<_, PaymentTransaction>("SELECT * FROM payment_transactions WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn push_notification(&self, n: NewNotification) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notifications (user_id, kind, channel, title, message, data, status) \
             VALUES ($1, $2, 'in_app', $3, $4, $5, 'sent')",
        )
        .bind(n.user_id)
        .bind(&n.kind)
        .bind(&n.title)
        .bind(&n.message)
        .bind(&n.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use storefront::domain::aggregates::{Coupon, Product};
use storefront::domain::value_objects::DiscountType;
use storefront::http::rate_limit::{MemoryRateLimiter, RateLimiter};
use storefront::services::payment::{
    self, GatewayOrder, GatewayPayment, GatewayRefund, PaymentError, PaymentGateway,
};
use storefront::services::shipping::{
    default_rates, AwbAssignment, CourierRate, ShipmentCreated, ShipmentRequest, ShippingCarrier, ShippingError,
};
use storefront::services::Integration;
use storefront::store::MemoryStore;
use storefront::{AppConfig, AppState, Providers};

pub const PAYMENT_SECRET: &str = "test_secret";
pub const WEBHOOK_SECRET: &str = "whsec";
pub const SHIPPING_WEBHOOK_SECRET: &str = "shipsec";
pub const JWT_SECRET: &str = "integration-secret";

/// Gateway double that signs with known secrets and records refunds.
/// `fail_next_refund` makes the next refund call fail once.
#[derive(Default)]
pub struct FakeGateway {
    pub orders_created: AtomicUsize,
    pub refunds: Mutex<Vec<String>>,
    pub fail_next_refund: AtomicBool,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str { "rzp_test_key" }

    fn verify_payment_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        let payload = payment::payment_signature_payload(gateway_order_id, payment_id);
        payment::verify_signature(PAYMENT_SECRET, payload.as_bytes(), signature)
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        payment::verify_signature(WEBHOOK_SECRET, body, signature)
    }

    async fn create_order(&self, amount: Decimal, currency: &str, receipt: &str, _notes: Value) -> Result<GatewayOrder, PaymentError> {
        let n = self.orders_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("order_test_{n}"),
            amount: payment::to_minor_units(amount)?,
            currency: currency.to_string(),
            receipt: Some(receipt.to_string()),
            status: "created".into(),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, PaymentError> {
        Ok(GatewayPayment {
            id: payment_id.to_string(), amount: 0, currency: "INR".into(), status: "captured".into(),
            order_id: None, method: Some("card".into()), captured: true,
        })
    }

    async fn refund(&self, payment_id: &str, _amount: Option<Decimal>, _notes: Value) -> Result<GatewayRefund, PaymentError> {
        if self.fail_next_refund.swap(false, Ordering::SeqCst) {
            return Err(PaymentError::Api { status: 502, message: "gateway timeout".into() });
        }
        let mut refunds = self.refunds.lock();
        refunds.push(payment_id.to_string());
        Ok(GatewayRefund {
            id: format!("rfnd_{}", refunds.len()), payment_id: payment_id.to_string(), amount: 0, status: "processed".into(),
        })
    }
}

/// Carrier double; `fail_next_awb` makes the next AWB assignment fail once.
#[derive(Default)]
pub struct FakeCarrier {
    pub shipments_created: AtomicUsize,
    pub awb_calls: AtomicUsize,
    pub cancelled: Mutex<Vec<i64>>,
    pub fail_next_awb: AtomicBool,
}

#[async_trait]
impl ShippingCarrier for FakeCarrier {
    fn pickup_location(&self) -> &str { "Primary" }

    async fn serviceability(&self, _pickup: &str, _delivery: &str, _grams: u32, _cod: bool) -> Result<Vec<CourierRate>, ShippingError> {
        Ok(default_rates())
    }

    async fn create_shipment(&self, _request: &ShipmentRequest) -> Result<ShipmentCreated, ShippingError> {
        let n = self.shipments_created.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        Ok(ShipmentCreated { shipment_id: 9000 + n, carrier_order_id: Some(7000 + n) })
    }

    async fn assign_awb(&self, shipment_id: i64, _courier_id: i64) -> Result<AwbAssignment, ShippingError> {
        self.awb_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_awb.swap(false, Ordering::SeqCst) {
            return Err(ShippingError::Api { status: 500, message: "courier unavailable".into() });
        }
        Ok(AwbAssignment { awb_code: format!("AWB{shipment_id}"), courier_name: Some("Test Courier".into()) })
    }

    async fn track(&self, awb: &str) -> Result<Value, ShippingError> {
        Ok(json!({ "awb": awb, "current_status": "IN TRANSIT" }))
    }

    async fn cancel_orders(&self, carrier_order_ids: &[i64]) -> Result<(), ShippingError> {
        self.cancelled.lock().extend_from_slice(carrier_order_ids);
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub carrier: Arc<FakeCarrier>,
}

pub fn config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/storefront_test".into()),
        "JWT_SECRET" => Some(JWT_SECRET.into()),
        "SHIPROCKET_WEBHOOK_SECRET" => Some(SHIPPING_WEBHOOK_SECRET.into()),
        _ => None,
    })
    .expect("test config")
}

/// State over an in-memory order store. The pool is lazy and never connects
/// unless a handler that bypasses the store is called.
pub fn harness() -> Harness {
    harness_with(true, true)
}

pub fn harness_with(payments: bool, shipping: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::default());
    let carrier = Arc::new(FakeCarrier::default());
    let config = config();
    let db = PgPoolOptions::new().connect_lazy(&config.database.url).expect("lazy pool");

    let payments: Integration<dyn PaymentGateway> = if payments {
        let client: Arc<dyn PaymentGateway> = gateway.clone();
        Integration::configured(client)
    } else {
        Integration::unconfigured(payment::PROVIDER)
    };
    let shipping: Integration<dyn ShippingCarrier> = if shipping {
        let client: Arc<dyn ShippingCarrier> = carrier.clone();
        Integration::configured(client)
    } else {
        Integration::unconfigured("shiprocket")
    };
    let api_limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::per_minute(1000));
    let auth_limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::per_minute(1000));

    let state = AppState::new(
        config,
        db,
        store.clone(),
        Providers { payments, shipping, nats: None, api_limiter, auth_limiter },
    );
    Harness { state, store, gateway, carrier }
}

pub fn product(id: i64, price: i64, stock: i32) -> Product {
    let now = Utc::now();
    Product {
        id, name: format!("Pashmina {id}"), price: Decimal::new(price, 0), description: String::new(),
        image: String::new(), category_id: None, colors: vec![], sizes: vec![], stock,
        is_featured: false, is_active: true, created_at: now, updated_at: now,
    }
}

pub fn percentage_coupon(code: &str, percent: i64, cap: i64) -> Coupon {
    let now = Utc::now();
    Coupon {
        id: 1, code: code.to_string(), description: String::new(), discount_type: DiscountType::Percentage,
        discount_value: Decimal::new(percent, 0), min_order_amount: Decimal::ZERO,
        max_discount_amount: Decimal::new(cap, 0), valid_from: now - Duration::days(1),
        valid_until: now + Duration::days(30), usage_limit: 0, used_count: 0, is_active: true,
        applicable_countries: vec![], created_at: now, updated_at: now,
    }
}

pub fn order_request(lines: &[(i64, u32)]) -> Value {
    json!({
        "items": lines.iter().map(|(id, qty)| json!({ "product_id": id, "quantity": qty })).collect::<Vec<_>>(),
        "shipping_name": "Asha Verma",
        "shipping_email": "asha@example.com",
        "shipping_address": "12 MG Road, Camp",
        "shipping_city": "Pune",
        "shipping_state": "Maharashtra",
        "shipping_country": "India",
        "shipping_zip": "411001",
        "shipping_phone": "+919876543210",
    })
}

pub fn payment_signature(gateway_order_id: &str, payment_id: &str) -> String {
    payment::sign(PAYMENT_SECRET, payment::payment_signature_payload(gateway_order_id, payment_id).as_bytes())
}

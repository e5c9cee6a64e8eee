//! Shipping carrier: the `ShippingCarrier` seam and its Shiprocket REST client.

use std::time::{Duration, Instant};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use crate::config::ShiprocketConfig;
use crate::domain::aggregates::OrderWithItems;

pub const PROVIDER: &str = "shiprocket";
const SHIPROCKET_API: &str = "https://apiv2.shiprocket.in/v1/external";
/// Login tokens are valid for ten days; refresh a day early.
const TOKEN_TTL: Duration = Duration::from_secs(9 * 24 * 60 * 60);
pub const MIN_WEIGHT_GRAMS: u32 = 500;
pub const TRACKING_URL: &str = "https://shiprocket.co/tracking";

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("carrier returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("carrier response is missing {0}")]
    MissingField(&'static str),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CourierRate {
    pub courier_name: String,
    pub rate: Decimal,
    pub currency: String,
    pub estimated_days: Option<u32>,
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courier_company_id: Option<i64>,
}

/// Flat rates quoted when no carrier account is configured.
pub fn default_rates() -> Vec<CourierRate> {
    vec![
        CourierRate {
            courier_name: "Standard Shipping".into(), rate: Decimal::new(150, 0), currency: "INR".into(),
            estimated_days: Some(5), service_type: "standard".into(), courier_company_id: None,
        },
        CourierRate {
            courier_name: "Express Shipping".into(), rate: Decimal::new(300, 0), currency: "INR".into(),
            estimated_days: Some(2), service_type: "express".into(), courier_company_id: None,
        },
    ]
}

/// Kilograms to grams with a 500 g floor; unparseable weights use the floor.
pub fn weight_to_grams(kg: Option<f64>) -> u32 {
    match kg {
        Some(kg) if kg.is_finite() && kg > 0.0 => ((kg * 1000.0) as u32).max(MIN_WEIGHT_GRAMS),
        _ => MIN_WEIGHT_GRAMS,
    }
}

pub fn tracking_url(awb: &str) -> String { format!("{TRACKING_URL}/{awb}") }

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ShipmentItem {
    pub name: String,
    pub sku: String,
    pub units: i32,
    pub selling_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
}

/// Ad-hoc order payload; every order ships prepaid in one default-sized parcel.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ShipmentRequest {
    pub order_id: String,
    pub order_date: String,
    pub pickup_location: String,
    pub channel_id: String,
    pub comment: String,
    pub billing_customer_name: String,
    pub billing_last_name: String,
    pub billing_address: String,
    pub billing_address_2: String,
    pub billing_city: String,
    pub billing_pincode: String,
    pub billing_state: String,
    pub billing_country: String,
    pub billing_email: String,
    pub billing_phone: String,
    pub shipping_is_billing: bool,
    pub order_items: Vec<ShipmentItem>,
    pub payment_method: String,
    pub shipping_charges: Decimal,
    pub giftwrap_charges: Decimal,
    pub transaction_charges: Decimal,
    pub total_discount: Decimal,
    pub sub_total: Decimal,
    pub length: u32,
    pub breadth: u32,
    pub height: u32,
    pub weight: f64,
}

impl ShipmentRequest {
    pub fn for_order(order: &OrderWithItems, pickup_location: &str) -> Self {
        let o = &order.order;
        let s = &o.shipping;
        Self {
            order_id: format!("ORD{}", o.id),
            order_date: o.created_at.format("%Y-%m-%d").to_string(),
            pickup_location: pickup_location.to_string(),
            channel_id: String::new(),
            comment: o.notes.clone(),
            billing_customer_name: s.shipping_name.clone(),
            billing_last_name: String::new(),
            billing_address: s.shipping_address.clone(),
            billing_address_2: String::new(),
            billing_city: s.shipping_city.clone(),
            billing_pincode: s.shipping_zip.clone(),
            billing_state: s.shipping_state.clone(),
            billing_country: s.shipping_country.clone(),
            billing_email: s.shipping_email.clone().unwrap_or_default(),
            billing_phone: s.shipping_phone.clone(),
            shipping_is_billing: true,
            order_items: order.items.iter().map(|item| ShipmentItem {
                name: item.product_name.clone(),
                sku: format!("SKU{}", item.product_id),
                units: item.quantity,
                selling_price: item.price,
                discount: Decimal::ZERO,
                tax: Decimal::ZERO,
            }).collect(),
            payment_method: "Prepaid".into(),
            shipping_charges: o.shipping_cost,
            giftwrap_charges: Decimal::ZERO,
            transaction_charges: Decimal::ZERO,
            total_discount: o.discount_amount,
            sub_total: o.total_amount - o.shipping_cost + o.discount_amount,
            length: 10,
            breadth: 10,
            height: 10,
            weight: 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShipmentCreated {
    pub shipment_id: i64,
    pub carrier_order_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwbAssignment {
    pub awb_code: String,
    pub courier_name: Option<String>,
}

#[async_trait]
pub trait ShippingCarrier: Send + Sync {
    fn pickup_location(&self) -> &str;
    async fn serviceability(&self, pickup_pin: &str, delivery_pin: &str, weight_grams: u32, cod: bool) -> Result<Vec<CourierRate>, ShippingError>;
    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<ShipmentCreated, ShippingError>;
    async fn assign_awb(&self, shipment_id: i64, courier_id: i64) -> Result<AwbAssignment, ShippingError>;
    async fn track(&self, awb: &str) -> Result<Value, ShippingError>;
    async fn cancel_orders(&self, carrier_order_ids: &[i64]) -> Result<(), ShippingError>;
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct ShiprocketClient {
    http: Client,
    base_url: String,
    email: String,
    password: String,
    pickup_location: String,
    token: Mutex<Option<CachedToken>>,
}

impl ShiprocketClient {
    pub fn new(config: &ShiprocketConfig, timeout: Duration) -> Result<Self, ShippingError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: SHIPROCKET_API.to_string(),
            email: config.email.clone(),
            password: config.password.clone(),
            pickup_location: config.pickup_location.clone(),
            token: Mutex::new(None),
        })
    }

    /// Cached login token; logs in again once the cached one expires.
    async fn token(&self) -> Result<String, ShippingError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(t.token.clone());
        }
        let response = self.http
            .post(format!("{}/auth/login", self.base_url))
            .json(&serde_json::json!({ "email": self.email, "password": self.password }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShippingError::Auth(format!("{}: {}", status.as_u16(), body)));
        }
        let body: Value = response.json().await?;
        let token = body["token"].as_str().filter(|t| !t.is_empty())
            .ok_or_else(|| ShippingError::Auth("invalid token response".into()))?
            .to_string();
        info!("shiprocket login succeeded");
        *cached = Some(CachedToken { token: token.clone(), expires_at: Instant::now() + TOKEN_TTL });
        Ok(token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ShippingError> {
        let token = self.token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShippingError::Api { status: status.as_u16(), message: body });
        }
        Ok(response.json().await?)
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_decimal(v: &Value) -> Option<Decimal> {
    v.as_f64().and_then(Decimal::from_f64).or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn parse_rates(body: &Value) -> Result<Vec<CourierRate>, ShippingError> {
    if let Some(status) = body["status"].as_i64().filter(|s| *s != 200) {
        let message = body["message"].as_str().unwrap_or("serviceability check failed").to_string();
        return Err(ShippingError::Api { status: status.clamp(0, u16::MAX as i64) as u16, message });
    }
    let Some(couriers) = body["data"]["available_courier_companies"].as_array() else { return Ok(Vec::new()) };
    Ok(couriers.iter().map(|c| CourierRate {
        courier_name: text(&c["courier_name"]),
        rate: as_decimal(&c["rate"]).unwrap_or_default(),
        currency: "INR".into(),
        estimated_days: as_i64(&c["estimated_delivery_days"]).and_then(|d| u32::try_from(d).ok()),
        service_type: text(&c["courier_type"]),
        courier_company_id: as_i64(&c["courier_company_id"]),
    }).collect())
}

/// Shipment id is read from the top level, or from `payload` on older API versions.
pub fn parse_shipment(body: &Value) -> Result<ShipmentCreated, ShippingError> {
    let shipment_id = as_i64(&body["shipment_id"]).or_else(|| as_i64(&body["payload"]["shipment_id"]))
        .filter(|id| *id > 0)
        .ok_or(ShippingError::MissingField("shipment_id"))?;
    let carrier_order_id = as_i64(&body["order_id"]).or_else(|| as_i64(&body["payload"]["order_id"]));
    Ok(ShipmentCreated { shipment_id, carrier_order_id })
}

pub fn parse_awb(body: &Value) -> Result<AwbAssignment, ShippingError> {
    let data = &body["response"]["data"];
    let awb_code = data["awb_code"].as_str().filter(|a| !a.is_empty())
        .ok_or(ShippingError::MissingField("awb_code"))?
        .to_string();
    Ok(AwbAssignment { awb_code, courier_name: data["courier_name"].as_str().map(str::to_string) })
}

#[async_trait]
impl ShippingCarrier for ShiprocketClient {
    fn pickup_location(&self) -> &str { &self.pickup_location }

    async fn serviceability(&self, pickup_pin: &str, delivery_pin: &str, weight_grams: u32, cod: bool) -> Result<Vec<CourierRate>, ShippingError> {
        let request = self.http.get(format!("{}/courier/serviceability/", self.base_url)).query(&[
            ("pickup_postcode", pickup_pin.to_string()),
            ("delivery_postcode", delivery_pin.to_string()),
            ("weight", weight_grams.to_string()),
            ("cod", u8::from(cod).to_string()),
        ]);
        let body: Value = self.send(request).await?;
        parse_rates(&body)
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<ShipmentCreated, ShippingError> {
        let body: Value = self.send(self.http.post(format!("{}/orders/create/adhoc", self.base_url)).json(request)).await?;
        let created = parse_shipment(&body)?;
        debug!(shipment_id = created.shipment_id, order = %request.order_id, "shipment created");
        Ok(created)
    }

    async fn assign_awb(&self, shipment_id: i64, courier_id: i64) -> Result<AwbAssignment, ShippingError> {
        let payload = serde_json::json!({ "shipment_id": shipment_id, "courier_id": courier_id });
        let body: Value = self.send(self.http.post(format!("{}/courier/assign/awb", self.base_url)).json(&payload)).await?;
        parse_awb(&body)
    }

    async fn track(&self, awb: &str) -> Result<Value, ShippingError> {
        self.send(self.http.get(format!("{}/courier/track/awb/{awb}", self.base_url))).await
    }

    async fn cancel_orders(&self, carrier_order_ids: &[i64]) -> Result<(), ShippingError> {
        let payload = serde_json::json!({ "ids": carrier_order_ids });
        let _: Value = self.send(self.http.post(format!("{}/orders/cancel", self.base_url)).json(&payload)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::domain::aggregates::order::sample_order;
    use crate::domain::aggregates::{OrderItem, OrderWithItems};

    #[test]
    fn test_weight_to_grams() {
        assert_eq!(weight_to_grams(None), 500);
        assert_eq!(weight_to_grams(Some(0.2)), 500);
        assert_eq!(weight_to_grams(Some(1.25)), 1250);
        assert_eq!(weight_to_grams(Some(f64::NAN)), 500);
    }

    #[test]
    fn test_default_rates() {
        let rates = default_rates();
        assert_eq!(rates.len(), 2);
        assert_eq!((rates[0].rate, rates[0].estimated_days), (Decimal::new(150, 0), Some(5)));
        assert_eq!((rates[1].rate, rates[1].estimated_days), (Decimal::new(300, 0), Some(2)));
    }

    #[test]
    fn test_shipment_request_for_order() {
        let mut order = sample_order(17, Some(1));
        order.total_amount = Decimal::new(1100, 0);
        order.shipping_cost = Decimal::new(150, 0);
        order.discount_amount = Decimal::new(50, 0);
        order.shipping.shipping_email = Some("asha@example.com".into());
        let items = vec![OrderItem {
            id: 1, order_id: 17, product_id: 4, product_name: "Pashmina Shawl".into(), quantity: 2,
            price: Decimal::new(500, 0), color: "Red".into(), size: String::new(),
        }];
        let req = ShipmentRequest::for_order(&OrderWithItems { order, items }, "Primary");
        assert_eq!(req.order_id, "ORD17");
        assert_eq!(req.sub_total, Decimal::new(1000, 0));
        assert_eq!(req.order_items[0].sku, "SKU4");
        assert_eq!(req.order_items[0].units, 2);
        assert_eq!(req.payment_method, "Prepaid");
        assert_eq!(req.billing_email, "asha@example.com");
        assert_eq!(req.pickup_location, "Primary");
    }

    #[test]
    fn test_parse_rates() {
        let body = json!({"status": 200, "data": {"available_courier_companies": [
            {"courier_name": "Delhivery", "rate": 92.5, "estimated_delivery_days": "4", "courier_type": "0", "courier_company_id": 14}
        ]}});
        let rates = parse_rates(&body).unwrap();
        assert_eq!(rates[0].courier_name, "Delhivery");
        assert_eq!(rates[0].estimated_days, Some(4));
        assert_eq!(rates[0].courier_company_id, Some(14));
        assert!(parse_rates(&json!({"status": 404, "message": "no couriers"})).is_err());
        assert!(parse_rates(&json!({"data": {}})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_shipment_and_awb() {
        let created = parse_shipment(&json!({"order_id": 901, "shipment_id": 777})).unwrap();
        assert_eq!(created, ShipmentCreated { shipment_id: 777, carrier_order_id: Some(901) });
        let legacy = parse_shipment(&json!({"payload": {"shipment_id": 5}})).unwrap();
        assert_eq!(legacy.shipment_id, 5);
        assert!(parse_shipment(&json!({"status": "NEW"})).is_err());

        let awb = parse_awb(&json!({"response": {"data": {"awb_code": "AWB42", "courier_name": "Bluedart"}}})).unwrap();
        assert_eq!(awb.awb_code, "AWB42");
        assert!(parse_awb(&json!({"response": {"data": {"awb_code": ""}}})).is_err());
    }

    #[test]
    fn test_tracking_url() {
        assert_eq!(tracking_url("AWB42"), "https://shiprocket.co/tracking/AWB42");
    }
}

//! Payment gateway: the `PaymentGateway` seam and its Razorpay REST client.

use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use crate::config::RazorpayConfig;

pub const PROVIDER: &str = "razorpay";
const RAZORPAY_API: &str = "https://api.razorpay.com/v1";

pub const SUPPORTED_CURRENCIES: &[&str] = &["INR", "USD", "EUR", "GBP", "AUD", "CAD", "JPY", "SGD", "AED", "CHF"];

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("gateway returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
}

/// Hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &str, message: &[u8]) -> String {
    // HMAC takes keys of any length, so this never falls through.
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else { return String::new() };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison against the expected hex signature.
pub fn verify_signature(secret: &str, message: &[u8], signature: &str) -> bool {
    let expected = sign(secret, message);
    if expected.is_empty() || signature.is_empty() { return false; }
    expected.as_bytes().ct_eq(signature.trim().as_bytes()).into()
}

/// Message signed by the checkout widget after a successful payment.
pub fn payment_signature_payload(gateway_order_id: &str, payment_id: &str) -> String {
    format!("{gateway_order_id}|{payment_id}")
}

pub fn is_supported_currency(currency: &str) -> bool { SUPPORTED_CURRENCIES.contains(&currency) }

/// Amount in the currency's minor unit (paise for INR).
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64().filter(|v| *v >= 0).ok_or(PaymentError::InvalidAmount(amount))
}

pub fn from_minor_units(amount: i64) -> Decimal { Decimal::new(amount, 2) }

/// `RCP<unix seconds><sub-second digits>`.
pub fn generate_receipt() -> String {
    let now = Utc::now();
    format!("RCP{}{}", now.timestamp(), now.timestamp_subsec_nanos() % 10_000)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GatewayPayment {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub captured: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the checkout widget.
    fn key_id(&self) -> &str;
    fn verify_payment_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool;
    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;

    async fn create_order(&self, amount: Decimal, currency: &str, receipt: &str, notes: serde_json::Value) -> Result<GatewayOrder, PaymentError>;
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, PaymentError>;
    /// Refunds `amount`, or the full captured amount when `None`.
    async fn refund(&self, payment_id: &str, amount: Option<Decimal>, notes: serde_json::Value) -> Result<GatewayRefund, PaymentError>;
}

pub struct RazorpayClient {
    http: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

impl RazorpayClient {
    pub fn new(config: &RazorpayConfig, timeout: Duration) -> Result<Self, PaymentError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: RAZORPAY_API.to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, PaymentError> {
        let response = request.basic_auth(&self.key_id, Some(&self.key_secret)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Api { status: status.as_u16(), message: api_error_message(&body) });
        }
        Ok(response.json().await?)
    }
}

/// Pulls `error.description` out of a Razorpay error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["description"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str { &self.key_id }

    fn verify_payment_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_signature(&self.key_secret, payment_signature_payload(gateway_order_id, payment_id).as_bytes(), signature)
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        verify_signature(&self.webhook_secret, body, signature)
    }

    async fn create_order(&self, amount: Decimal, currency: &str, receipt: &str, notes: serde_json::Value) -> Result<GatewayOrder, PaymentError> {
        let body = serde_json::json!({
            "amount": to_minor_units(amount)?,
            "currency": currency,
            "receipt": receipt,
            "notes": notes,
        });
        self.send(self.http.post(format!("{}/orders", self.base_url)).json(&body)).await
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, PaymentError> {
        self.send(self.http.get(format!("{}/payments/{payment_id}", self.base_url))).await
    }

    async fn refund(&self, payment_id: &str, amount: Option<Decimal>, notes: serde_json::Value) -> Result<GatewayRefund, PaymentError> {
        let mut body = serde_json::json!({ "notes": notes });
        if let Some(amount) = amount {
            body["amount"] = to_minor_units(amount)?.into();
        }
        self.send(self.http.post(format!("{}/payments/{payment_id}/refund", self.base_url)).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = "order_9A33XWu170gUtm";
    const PAYMENT: &str = "pay_29QQoUBi66xm2f";
    const EXPECTED: &str = "a982c20f48234e966ccc8d903bff75730b34341007236ad8c8a9d7c0ae5848c5";

    fn client() -> RazorpayClient {
        let config = RazorpayConfig { key_id: "rzp_test".into(), key_secret: "test_secret".into(), webhook_secret: "whsec".into() };
        RazorpayClient::new(&config, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn test_payment_signature() {
        assert_eq!(sign("test_secret", payment_signature_payload(ORDER, PAYMENT).as_bytes()), EXPECTED);
        let client = client();
        assert!(client.verify_payment_signature(ORDER, PAYMENT, EXPECTED));
        assert!(!client.verify_payment_signature(ORDER, "pay_other", EXPECTED));
        assert!(!client.verify_payment_signature(ORDER, PAYMENT, &EXPECTED[1..]));
        assert!(!verify_signature("wrong_secret", payment_signature_payload(ORDER, PAYMENT).as_bytes(), EXPECTED));
    }

    #[test]
    fn test_webhook_signature_uses_webhook_secret() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = "4673dd707ef4c41b987cb7fefe1583142dc702388c93145b7814b9ad3d3c183e";
        assert!(client().verify_webhook_signature(body, sig));
        assert!(!client().verify_webhook_signature(br#"{"event":"payment.failed"}"#, sig));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(Decimal::new(49999, 2)).unwrap(), 49999);
        assert_eq!(to_minor_units(Decimal::new(1500, 0)).unwrap(), 150000);
        assert!(to_minor_units(Decimal::new(-1, 0)).is_err());
        assert_eq!(from_minor_units(150000), Decimal::new(1500, 0));
    }

    #[test]
    fn test_receipt_format() {
        let receipt = generate_receipt();
        assert!(receipt.starts_with("RCP"));
        assert!(receipt[3..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"The amount must be atleast INR 1.00"}}"#;
        assert_eq!(api_error_message(body), "The amount must be atleast INR 1.00");
        assert_eq!(api_error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn test_currencies() {
        assert!(is_supported_currency("INR"));
        assert!(!is_supported_currency("XYZ"));
    }
}

//! Payment transaction log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::TransactionStatus;

/// One gateway interaction. Rows are only ever appended.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentTransaction {
    pub id: i64,
    pub order_id: i64,
    pub provider: String,
    pub amount: Decimal,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    pub transaction_id: String,
    pub order_id_ext: String,
    pub signature: String,
    pub failure_reason: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTransaction {
    pub provider: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub transaction_id: String,
    pub order_id_ext: String,
    pub signature: String,
    pub failure_reason: String,
    pub metadata: serde_json::Value,
}

impl NewTransaction {
    pub fn success(provider: &str, amount: Decimal, currency: &str, payment_id: &str, gateway_order_id: &str, signature: &str) -> Self {
        Self {
            provider: provider.into(), amount, currency: currency.into(), status: TransactionStatus::Success,
            transaction_id: payment_id.into(), order_id_ext: gateway_order_id.into(), signature: signature.into(),
            failure_reason: String::new(), metadata: serde_json::Value::Null,
        }
    }

    pub fn refund(provider: &str, amount: Decimal, currency: &str, refund_id: &str, reason: &str) -> Self {
        Self {
            provider: provider.into(), amount, currency: currency.into(), status: TransactionStatus::Refunded,
            transaction_id: refund_id.into(), order_id_ext: String::new(), signature: String::new(),
            failure_reason: String::new(), metadata: serde_json::json!({ "reason": reason }),
        }
    }
}

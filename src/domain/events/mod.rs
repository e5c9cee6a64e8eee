//! Domain events
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use crate::domain::aggregates::Order;
use crate::domain::value_objects::{OrderStatus, PaymentStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderEventKind {
    Created,
    Paid,
    PaymentFailed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderEventKind {
    /// Suffix used for message types (`order.<suffix>`) and NATS subjects.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::PaymentFailed => "payment_failed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn message_type(&self) -> String { format!("order.{}", self.suffix()) }

    /// Event emitted when an order lands in `status`, if any.
    pub fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Paid => Some(Self::Paid),
            OrderStatus::PaymentFailed => Some(Self::PaymentFailed),
            OrderStatus::Processing => Some(Self::Processing),
            OrderStatus::Shipped => Some(Self::Shipped),
            OrderStatus::Delivered => Some(Self::Delivered),
            OrderStatus::Cancelled => Some(Self::Cancelled),
            OrderStatus::PendingPayment | OrderStatus::Confirmed | OrderStatus::Refunded => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Created => "Order placed",
            Self::Paid => "Payment received",
            Self::PaymentFailed => "Payment failed",
            Self::Processing => "Order is being prepared",
            Self::Shipped => "Order shipped",
            Self::Delivered => "Order delivered",
            Self::Cancelled => "Order cancelled",
        }
    }
}

/// Order lifecycle event, serialized as the `data` of a live-update message.
#[derive(Clone, Debug, Serialize)]
pub struct OrderEvent {
    #[serde(skip)]
    pub kind: OrderEventKind,
    pub order_id: i64,
    pub user_id: Option<i64>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub tracking_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn from_order(kind: OrderEventKind, order: &Order) -> Self {
        Self {
            kind,
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            tracking_number: order.tracking_number.clone(),
            occurred_at: Utc::now(),
        }
    }

    pub fn message(&self) -> String { format!("Order #{} is now {}", self.order_id, self.status) }

    /// `{"type": ..., "data": ...}` envelope pushed to live clients.
    pub fn envelope(&self, message_type: &str) -> serde_json::Value {
        serde_json::json!({ "type": message_type, "data": self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::sample_order;

    #[test]
    fn test_event_envelope() {
        let order = sample_order(42, Some(7));
        let event = OrderEvent::from_order(OrderEventKind::Created, &order);
        let value = event.envelope(&event.kind.message_type());
        assert_eq!(value["type"], "order.created");
        assert_eq!(value["data"]["order_id"], 42);
        assert_eq!(value["data"]["status"], "pending_payment");
    }

    #[test]
    fn test_status_events() {
        assert_eq!(OrderEventKind::for_status(OrderStatus::Shipped), Some(OrderEventKind::Shipped));
        assert_eq!(OrderEventKind::for_status(OrderStatus::Confirmed), None);
        assert_eq!(OrderEventKind::PaymentFailed.message_type(), "order.payment_failed");
    }
}

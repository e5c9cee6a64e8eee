//! Value Objects for the storefront

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a text-backed enum: `as_str`, `Display`, `FromStr` and `TryFrom<String>`
/// so rows can decode it with `#[sqlx(try_from = "String")]`.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name { $($variant),+ }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub fn as_str(&self) -> &'static str { match self { $($name::$variant => $text),+ } }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s { $($text => Ok($name::$variant),)+ other => Err(UnknownVariant { kind: $what, value: other.to_string() }) }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;
            fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
        }
    };
}

text_enum!(
    /// Lifecycle status of an order.
    OrderStatus, "order status" {
        PendingPayment => "pending_payment",
        Confirmed => "confirmed",
        Paid => "paid",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
        Refunded => "refunded",
        PaymentFailed => "payment_failed",
    }
);

text_enum!(
    PaymentStatus, "payment status" {
        Pending => "pending",
        Paid => "paid",
        Failed => "failed",
        Refunded => "refunded",
    }
);

text_enum!(
    DiscountType, "discount type" {
        Percentage => "percentage",
        Fixed => "fixed",
    }
);

text_enum!(
    /// Recorded progress of the cancellation saga. Steps only move forward.
    CancellationStep, "cancellation step" {
        Requested => "requested",
        RefundIssued => "refund_issued",
        ShipmentReleased => "shipment_released",
        Completed => "completed",
    }
);

text_enum!(
    /// Recorded progress of shipping-label generation.
    FulfillmentStep, "fulfillment step" {
        ShipmentCreated => "shipment_created",
        AwbAssigned => "awb_assigned",
    }
);

text_enum!(
    TransactionStatus, "transaction status" {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
        Refunded => "refunded",
    }
);

text_enum!(
    Role, "role" {
        User => "user",
        Admin => "admin",
    }
);

impl OrderStatus {
    /// Shipped and delivered orders are past the point of cancellation.
    pub fn is_cancellable(&self) -> bool { !matches!(self, Self::Shipped | Self::Delivered) }
    pub fn is_closed(&self) -> bool { matches!(self, Self::Cancelled | Self::Refunded) }
}

impl CancellationStep {
    fn rank(&self) -> u8 {
        match self { Self::Requested => 0, Self::RefundIssued => 1, Self::ShipmentReleased => 2, Self::Completed => 3 }
    }
    /// True once the saga has progressed to (or beyond) `other`.
    pub fn reached(&self, other: CancellationStep) -> bool { self.rank() >= other.rank() }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct UnknownVariant { pub kind: &'static str, pub value: String }

/// Stock quantity; never negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    /// Stock columns are signed in the database; negative values clamp to zero.
    pub fn from_stock(value: i32) -> Self { Self(value.max(0) as u32) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 { None } else { Some(Self(self.0 - other)) }
    }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

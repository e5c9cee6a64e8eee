//! Aggregates module
pub mod product;
pub mod order;
pub mod coupon;
pub mod customer;
pub mod payment;

pub use product::{slugify, Catalogue, CatalogueWithProducts, Category, Product, ProductError};
pub use order::{
    CancellationStart, DraftLine, GatewayRefs, Order, OrderDraft, OrderError, OrderItem, OrderPricing,
    OrderWithItems, PaymentApplied, PaymentOutcome, PricingError, ShippingSnapshot,
};
pub use coupon::{Coupon, CouponRejection};
pub use customer::{
    Address, NewNotification, Notification, NotificationPreference, Review, User, WishlistItem,
};
pub use payment::{NewTransaction, PaymentTransaction};

//! Storefront backend
//!
//! Catalog, checkout and fulfilment service for a single-merchant shop.
//!
//! ## Features
//! - Product catalog, categories and curated catalogues
//! - Orders with stock reservation and coupon pricing
//! - Razorpay payments with signature verification and webhooks
//! - Shiprocket rates, labels and tracking
//! - Accounts, addresses, reviews, wishlists and notifications
//! - Live order updates over WebSocket

pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod services;
pub mod state;
pub mod store;
pub mod validation;
pub mod ws;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use http::router;
pub use state::{AppState, Providers};

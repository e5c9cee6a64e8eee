//! Route handlers grouped by resource.

pub mod account;
pub mod catalog;
pub mod coupons;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reviews;
pub mod shipping;
pub mod webhooks;
pub mod wishlist;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use crate::validation::Pagination;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageParams {
    pub fn pagination(&self) -> Pagination { Pagination::new(self.page, self.limit) }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: Pagination) -> Self {
        Self { data, total, page: page.page, limit: page.limit }
    }
}

pub fn message(text: &str) -> Value { json!({ "message": text }) }

/// Postgres unique-violation, used to turn duplicate inserts into 409s.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

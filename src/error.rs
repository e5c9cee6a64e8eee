//! Application error type and its HTTP rendering.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use crate::domain::aggregates::{CouponRejection, OrderError, PricingError};
use crate::services::payment::PaymentError;
use crate::services::shipping::ShippingError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient stock")]
    InsufficientStock { product_id: i64, product: String, available: i32, requested: u32 },
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(what: &str) -> Self { Self::NotFound(format!("{what} not found")) }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::InsufficientStock { product_id, product, available, requested } => json!({
                "error": "Insufficient stock",
                "product_id": product_id,
                "product": product,
                "available": available,
                "requested": requested,
            }),
            Self::Database(_) => json!({ "error": "Database operation failed" }),
            Self::Config(_) | Self::Internal(_) => json!({ "error": "Internal server error" }),
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(id) => Self::Validation(format!("Product {id} not found")),
            StoreError::InsufficientStock { product_id, product, available, requested } => {
                Self::InsufficientStock { product_id, product, available, requested }
            }
            StoreError::NotFound(what) => Self::not_found(what),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Coupon(rejection) => rejection.into(),
            StoreError::Order(e) => e.into(),
            StoreError::Database(e) => Self::Database(e),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotCancellable(_) => Self::Validation("Cannot cancel shipped or delivered order".into()),
            OrderError::Closed(_) | OrderError::LabelExists | OrderError::AlreadyPaid | OrderError::RefundPending => {
                Self::Conflict(err.to_string())
            }
            OrderError::NotPaid => Self::Validation(err.to_string()),
        }
    }
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Coupon(rejection) => rejection.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<CouponRejection> for AppError {
    fn from(err: CouponRejection) -> Self { Self::Validation(err.to_string()) }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature => Self::Validation("Invalid payment signature".into()),
            other => Self::Upstream(format!("Payment provider error: {other}")),
        }
    }
}

impl From<ShippingError> for AppError {
    fn from(err: ShippingError) -> Self { Self::Upstream(format!("Shipping provider error: {err}")) }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self { Self::Validation(format!("Invalid request body: {}", err.body_text())) }
}

impl From<PathRejection> for AppError {
    fn from(err: PathRejection) -> Self { Self::Validation(format!("Invalid path parameter: {}", err.body_text())) }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self { Self::Validation(format!("Invalid query string: {}", err.body_text())) }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self { Self::Validation(crate::validation::describe(&err)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::ServiceUnavailable("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::from(StoreError::NotFound("Order")).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_errors_keep_their_meaning() {
        let err: AppError = StoreError::ProductNotFound(9).into();
        assert_eq!(err.to_string(), "Product 9 not found");
        let err: AppError = OrderError::NotCancellable(crate::domain::value_objects::OrderStatus::Shipped).into();
        assert_eq!(err.to_string(), "Cannot cancel shipped or delivered order");
    }
}

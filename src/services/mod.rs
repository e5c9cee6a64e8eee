//! Services: third-party integrations and the order lifecycle built on them.

pub mod auth;
pub mod notifier;
pub mod orders;
pub mod payment;
pub mod shipping;

use std::sync::Arc;
use crate::error::AppError;

/// A third-party provider that may or may not have credentials at startup.
pub enum Integration<T: ?Sized> {
    Configured(Arc<T>),
    Unconfigured { name: &'static str },
}

impl<T: ?Sized> Integration<T> {
    pub fn configured(client: Arc<T>) -> Self { Self::Configured(client) }
    pub fn unconfigured(name: &'static str) -> Self { Self::Unconfigured { name } }

    pub fn is_configured(&self) -> bool { matches!(self, Self::Configured(_)) }

    pub fn as_option(&self) -> Option<&Arc<T>> {
        match self { Self::Configured(c) => Some(c), Self::Unconfigured { .. } => None }
    }

    /// The client, or 503 when the provider has no credentials.
    pub fn get(&self) -> Result<&Arc<T>, AppError> {
        match self {
            Self::Configured(c) => Ok(c),
            Self::Unconfigured { name } => Err(AppError::ServiceUnavailable(format!("{name} is not configured"))),
        }
    }
}

impl<T: ?Sized> Clone for Integration<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Configured(c) => Self::Configured(Arc::clone(c)),
            Self::Unconfigured { name } => Self::Unconfigured { name },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_unconfigured_is_service_unavailable() {
        let integration: Integration<str> = Integration::unconfigured("Payment service");
        let err = integration.get().unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "Payment service is not configured");
        assert!(integration.as_option().is_none());
    }

    #[test]
    fn test_configured() {
        let integration: Integration<str> = Integration::configured(Arc::from("client"));
        assert!(integration.is_configured());
        assert_eq!(&**integration.get().unwrap(), "client");
    }
}

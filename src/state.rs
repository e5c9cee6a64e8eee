//! Shared application state handed to every handler.

use std::sync::Arc;
use sqlx::PgPool;
use crate::config::AppConfig;
use crate::http::rate_limit::RateLimiter;
use crate::services::auth::TokenService;
use crate::services::notifier::Notifier;
use crate::services::orders::OrderService;
use crate::services::payment::PaymentGateway;
use crate::services::shipping::ShippingCarrier;
use crate::services::Integration;
use crate::store::OrderStore;
use crate::ws::Hub;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn OrderStore>,
    pub orders: OrderService,
    pub payments: Integration<dyn PaymentGateway>,
    pub shipping: Integration<dyn ShippingCarrier>,
    pub hub: Arc<Hub>,
    pub tokens: Arc<TokenService>,
    pub api_limiter: Arc<dyn RateLimiter>,
    pub auth_limiter: Arc<dyn RateLimiter>,
    pub config: Arc<AppConfig>,
}

/// Everything `AppState::new` needs besides the pool and the order store.
pub struct Providers {
    pub payments: Integration<dyn PaymentGateway>,
    pub shipping: Integration<dyn ShippingCarrier>,
    pub nats: Option<async_nats::Client>,
    pub api_limiter: Arc<dyn RateLimiter>,
    pub auth_limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, db: PgPool, store: Arc<dyn OrderStore>, providers: Providers) -> Self {
        let hub = Arc::new(Hub::new(config.ws_client_buffer));
        let notifier = Notifier::new(hub.clone(), store.clone(), providers.nats);
        let orders = OrderService::new(
            store.clone(),
            providers.payments.clone(),
            providers.shipping.clone(),
            notifier,
            config.shiprocket_webhook_secret.clone(),
        );
        Self {
            db,
            store,
            orders,
            payments: providers.payments,
            shipping: providers.shipping,
            hub,
            tokens: Arc::new(TokenService::new(&config.jwt_secret, config.jwt_ttl_hours)),
            api_limiter: providers.api_limiter,
            auth_limiter: providers.auth_limiter,
            config: Arc::new(config),
        }
    }
}

//! Storefront backend server.

use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use storefront::http::rate_limit::{MemoryRateLimiter, RateLimiter, WINDOW};
use storefront::services::payment::{self, PaymentGateway, RazorpayClient};
use storefront::services::shipping::{self, ShippingCarrier, ShiprocketClient};
use storefront::services::Integration;
use storefront::store::{OrderStore, PgStore};
use storefront::{AppConfig, AppState, Providers};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "NATS unavailable, order events stay local");
                None
            }
        },
        None => None,
    };

    let payments: Integration<dyn PaymentGateway> = match &config.razorpay {
        Some(cfg) => {
            let client: Arc<dyn PaymentGateway> = Arc::new(RazorpayClient::new(cfg, config.provider_timeout)?);
            Integration::configured(client)
        }
        None => {
            warn!("Razorpay credentials not set, payment endpoints will answer 503");
            Integration::unconfigured(payment::PROVIDER)
        }
    };
    let shipping: Integration<dyn ShippingCarrier> = match &config.shiprocket {
        Some(cfg) => {
            let client: Arc<dyn ShippingCarrier> = Arc::new(ShiprocketClient::new(cfg, config.provider_timeout)?);
            Integration::configured(client)
        }
        None => {
            warn!("Shiprocket credentials not set, using default shipping rates");
            Integration::unconfigured(shipping::PROVIDER)
        }
    };

    let api_limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::per_minute(config.rate_limit_api_per_min));
    let auth_limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::per_minute(config.rate_limit_auth_per_min));
    let limiters = [api_limiter.clone(), auth_limiter.clone()];
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(WINDOW);
        loop {
            tick.tick().await;
            limiters.iter().for_each(|l| l.sweep());
        }
    });

    let addr = config.bind_addr();
    let store: Arc<dyn OrderStore> = Arc::new(PgStore::new(db.clone()));
    let state = AppState::new(config, db, store, Providers { payments, shipping, nats, api_limiter, auth_limiter });
    let app = storefront::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "storefront listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("storefront stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

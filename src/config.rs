//! Environment-driven configuration.

use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use crate::error::{AppError, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub environment: String,
    pub allowed_origins: Vec<String>,
    pub razorpay: Option<RazorpayConfig>,
    pub shiprocket: Option<ShiprocketConfig>,
    pub shiprocket_webhook_secret: Option<String>,
    pub nats_url: Option<String>,
    pub provider_timeout: Duration,
    pub rate_limit_api_per_min: u32,
    pub rate_limit_auth_per_min: u32,
    /// Peers whose `X-Forwarded-For` header names the real client.
    pub trusted_proxies: Vec<IpAddr>,
    pub ws_client_buffer: usize,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
}

impl std::fmt::Debug for RazorpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayConfig").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ShiprocketConfig {
    pub email: String,
    pub password: String,
    pub pickup_location: String,
}

impl std::fmt::Debug for ShiprocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShiprocketConfig").field("email", &self.email).finish_non_exhaustive()
    }
}

const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| AppError::Config(format!("missing environment variable {key}")));
        fn parse<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
            match value {
                Some(v) => v.parse().map_err(|_| AppError::Config(format!("invalid value for {key}: {v}"))),
                None => Ok(default),
            }
        }

        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: parse("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), 25)?,
            min_connections: parse("DB_MIN_CONNECTIONS", get("DB_MIN_CONNECTIONS"), 0)?,
            acquire_timeout: Duration::from_secs(parse("DB_ACQUIRE_TIMEOUT_SECS", get("DB_ACQUIRE_TIMEOUT_SECS"), 5)?),
        };

        let razorpay = match (get("RAZORPAY_KEY_ID"), get("RAZORPAY_KEY_SECRET")) {
            (Some(key_id), Some(key_secret)) => Some(RazorpayConfig {
                webhook_secret: get("RAZORPAY_WEBHOOK_SECRET").unwrap_or_else(|| key_secret.clone()),
                key_id,
                key_secret,
            }),
            _ => None,
        };
        let shiprocket = match (get("SHIPROCKET_EMAIL"), get("SHIPROCKET_PASSWORD")) {
            (Some(email), Some(password)) => Some(ShiprocketConfig {
                email,
                password,
                pickup_location: get("SHIPROCKET_PICKUP_LOCATION").unwrap_or_else(|| "Primary".into()),
            }),
            _ => None,
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ORIGINS.into())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let trusted_proxies = get("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<IpAddr>().map_err(|_| AppError::Config(format!("TRUSTED_PROXIES: invalid address {p}"))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse("PORT", get("PORT"), 8080)?,
            database,
            jwt_secret: required("JWT_SECRET")?,
            jwt_ttl_hours: parse("JWT_TTL_HOURS", get("JWT_TTL_HOURS"), 168)?,
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".into()),
            allowed_origins,
            razorpay,
            shiprocket,
            shiprocket_webhook_secret: get("SHIPROCKET_WEBHOOK_SECRET"),
            nats_url: get("NATS_URL"),
            provider_timeout: Duration::from_secs(parse("PROVIDER_TIMEOUT_SECS", get("PROVIDER_TIMEOUT_SECS"), 30)?),
            rate_limit_api_per_min: parse("RATE_LIMIT_API_PER_MIN", get("RATE_LIMIT_API_PER_MIN"), 100)?,
            rate_limit_auth_per_min: parse("RATE_LIMIT_AUTH_PER_MIN", get("RATE_LIMIT_AUTH_PER_MIN"), 10)?,
            trusted_proxies,
            ws_client_buffer: parse("WS_CLIENT_BUFFER", get("WS_CLIENT_BUFFER"), 256)?,
        })
    }

    pub fn is_development(&self) -> bool { self.environment == "development" }
    pub fn bind_addr(&self) -> String { format!("{}:{}", self.host, self.port) }
}

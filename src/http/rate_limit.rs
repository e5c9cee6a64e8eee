//! Per-client request limits.
//!
//! The in-memory limiter is process local and forgets everything on restart;
//! a shared backend can replace it behind [`RateLimiter`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tracing::debug;
use crate::error::AppError;

pub const WINDOW: Duration = Duration::from_secs(60);

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one request for `key`; false once the key is over its limit.
    async fn allow(&self, key: &str) -> bool;
    /// Drops idle keys. Backends with their own expiry can ignore it.
    fn sweep(&self) {}
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed one-minute windows per key.
pub struct MemoryRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
    pub fn per_minute(limit: u32) -> Self { Self::new(limit, WINDOW) }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, windows: Mutex::new(HashMap::new()) }
    }

    pub fn hit_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_string()).or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= self.limit
    }

    pub fn sweep_at(&self, now: Instant) {
        let window = self.window;
        self.windows.lock().retain(|_, w| now.duration_since(w.started) < window);
    }

    pub fn tracked_keys(&self) -> usize { self.windows.lock().len() }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str) -> bool { self.hit_at(key, Instant::now()) }
    fn sweep(&self) { self.sweep_at(Instant::now()) }
}

/// Middleware state for [`rate_limit`].
#[derive(Clone)]
pub struct RateLimit {
    pub limiter: Arc<dyn RateLimiter>,
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimit {
    pub fn new(limiter: Arc<dyn RateLimiter>, trusted_proxies: &[IpAddr]) -> Self {
        Self { limiter, trusted_proxies: trusted_proxies.into() }
    }
}

/// The peer address. `X-Forwarded-For` is only read when the peer is a trusted proxy.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|p| p.ip()) else { return "unknown".into() };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}

pub async fn rate_limit(State(limit): State<RateLimit>, req: Request, next: Next) -> Response {
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let key = client_key(req.headers(), peer, &limit.trusted_proxies);
    if !limit.limiter.allow(&key).await {
        debug!(client = %key, path = %req.uri().path(), "rate limited");
        return AppError::RateLimited.into_response();
    }
    next.run(req).await
}

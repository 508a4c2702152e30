//! Runtime settings
//!
//! Everything comes from the environment (with `.env` loaded by the binary).
//! Secrets are required; the rest has sensible defaults.

use crate::live::DEFAULT_QUEUE_CAPACITY;
use anyhow::{Context, Result};
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Secret for signing access tokens.
    pub jwt_secret: String,
    /// Secret for MACing anti-forgery tokens.
    pub csrf_secret: String,
    /// Access token lifetime, minutes.
    pub access_ttl_minutes: i64,
    /// Refresh session lifetime with "remember me", days. Without it the
    /// session lasts one day.
    pub refresh_ttl_days: i64,
    /// Origin the browser client is served from; cookies are marked Secure
    /// when it is https.
    pub frontend_url: String,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub csrf_cookie_name: String,
    /// Per-subscriber live queue capacity.
    pub queue_capacity: usize,
    /// Streaming heartbeat period, seconds.
    pub heartbeat_secs: u64,
    /// Per-caller requests per minute on the abuse-prone auth endpoints.
    pub rate_limit_per_minute: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let bind = env_or_str("HB_BIND", "127.0.0.1:8080");
        let bind_addr = bind.parse().context("Invalid HB_BIND address")?;

        Ok(Self {
            bind_addr,
            jwt_secret: std::env::var("HB_JWT_SECRET").context("HB_JWT_SECRET not set")?,
            csrf_secret: std::env::var("HB_CSRF_SECRET").context("HB_CSRF_SECRET not set")?,
            access_ttl_minutes: env_or("HB_ACCESS_TTL_MINUTES", 15),
            refresh_ttl_days: env_or("HB_REFRESH_TTL_DAYS", 30),
            frontend_url: env_or_str("HB_FRONTEND_URL", "http://localhost:3000"),
            access_cookie_name: env_or_str("HB_ACCESS_COOKIE", "hb_access"),
            refresh_cookie_name: env_or_str("HB_REFRESH_COOKIE", "hb_refresh"),
            csrf_cookie_name: env_or_str("HB_CSRF_COOKIE", "hb_csrf"),
            queue_capacity: env_or("HB_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            heartbeat_secs: env_or("HB_HEARTBEAT_SECS", 25),
            rate_limit_per_minute: env_or("HB_RATE_LIMIT_PER_MINUTE", 20),
        })
    }

    /// Cookies get the Secure attribute only behind https.
    pub fn cookies_secure(&self) -> bool {
        self.frontend_url.starts_with("https://")
    }

    /// Fixed settings for tests; never reads the environment.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            jwt_secret: "test-jwt-secret".to_string(),
            csrf_secret: "test-csrf-secret".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 30,
            frontend_url: "http://localhost:3000".to_string(),
            access_cookie_name: "hb_access".to_string(),
            refresh_cookie_name: "hb_refresh".to_string(),
            csrf_cookie_name: "hb_csrf".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_secs: 25,
            rate_limit_per_minute: 20,
        }
    }
}

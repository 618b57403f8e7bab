//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::StorefrontConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; in-memory backends when unset
/// - `ORDER_EXPIRATION_SECS`: unpaid order lifetime (default: `900`)
/// - `EXPIRY_SWEEP_INTERVAL_SECS`: expiry sweep period (default: `5`)
/// - `BUS_POLL_INTERVAL_MS`: consumer poll period (default: `100`)
/// - `GATEWAY_TIMEOUT_MS`: payment gateway call timeout (default: `5000`)
/// - `STARTUP_MAX_ATTEMPTS`: database connection attempts (default: `10`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub order_expiration: Duration,
    pub expiry_sweep_interval: Duration,
    pub bus_poll_interval: Duration,
    pub gateway_timeout: Duration,
    pub stale_reservation_after: Duration,
    pub startup_max_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key-value source. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            order_expiration: parse("ORDER_EXPIRATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.order_expiration),
            expiry_sweep_interval: parse("EXPIRY_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.expiry_sweep_interval),
            bus_poll_interval: parse("BUS_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.bus_poll_interval),
            gateway_timeout: parse("GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            stale_reservation_after: parse("STALE_RESERVATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_reservation_after),
            startup_max_attempts: parse("STARTUP_MAX_ATTEMPTS")
                .map(|n| n.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(defaults.startup_max_attempts),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the saga timings configured here.
    pub fn storefront(&self) -> StorefrontConfig {
        StorefrontConfig {
            order_ttl: self.order_expiration,
            expiry_sweep_interval: self.expiry_sweep_interval,
            poll_interval: self.bus_poll_interval,
            gateway_timeout: self.gateway_timeout,
            stale_claim_after: self.stale_reservation_after,
            ..StorefrontConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            order_expiration: Duration::from_secs(900),
            expiry_sweep_interval: Duration::from_secs(5),
            bus_poll_interval: Duration::from_millis(100),
            gateway_timeout: Duration::from_millis(5000),
            stale_reservation_after: Duration::from_secs(30),
            startup_max_attempts: 10,
        }
    }
}

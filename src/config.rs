//! Configuration module for labdash.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Malformed values never fail startup; they fall back to the default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default number of days status log entries are kept.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
/// Longest retention window accepted; larger values are capped.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "labdash.db";
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 10;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "labdash.db")
    pub db_path: String,
    /// Seconds between probe cycles (default: 60)
    pub check_interval_secs: u64,
    /// Maximum probes in flight at once (default: 10)
    pub max_concurrent_checks: usize,
    /// Per-probe timeout in seconds (default: 10)
    pub probe_timeout_secs: u64,
    /// Days of status log history to keep (default: 30)
    pub retention_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            db_path: DEFAULT_DB_PATH.to_string(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LABDASH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `LABDASH_DB_PATH`: Database file path (default: "labdash.db")
    /// - `LABDASH_CHECK_INTERVAL_SECS`: Probe cycle interval (default: 60)
    /// - `LABDASH_MAX_CONCURRENT_CHECKS`: Concurrency ceiling (default: 10)
    /// - `LABDASH_PROBE_TIMEOUT_SECS`: Per-probe timeout (default: 10)
    /// - `LABDASH_STATUS_LOG_RETENTION_DAYS`: History retention (default: 30)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("LABDASH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("LABDASH_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg.check_interval_secs = parse_positive(
            env::var("LABDASH_CHECK_INTERVAL_SECS").ok().as_deref(),
            DEFAULT_CHECK_INTERVAL_SECS,
        );
        cfg.max_concurrent_checks = parse_positive(
            env::var("LABDASH_MAX_CONCURRENT_CHECKS").ok().as_deref(),
            DEFAULT_MAX_CONCURRENT_CHECKS,
        );
        cfg.probe_timeout_secs = parse_positive(
            env::var("LABDASH_PROBE_TIMEOUT_SECS").ok().as_deref(),
            DEFAULT_PROBE_TIMEOUT_SECS,
        );
        cfg.retention_days =
            parse_retention_days(env::var("LABDASH_STATUS_LOG_RETENTION_DAYS").ok().as_deref());

        cfg
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Parse a retention window in days.
///
/// Absent, non-numeric, zero and negative values all yield
/// [`DEFAULT_RETENTION_DAYS`]. Anything above [`MAX_RETENTION_DAYS`] is
/// capped there.
pub fn parse_retention_days(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|days| *days > 0)
        .map(|days| days.min(i64::from(MAX_RETENTION_DAYS)) as u32)
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

/// Parse a strictly positive number, falling back to `default` otherwise.
pub fn parse_positive<T>(raw: Option<&str>, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    raw.and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

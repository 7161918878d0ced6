//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Health of a registered service as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Online => "online",
            ServiceStatus::Offline => "offline",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ServiceStatus::Online),
            "offline" => Ok(ServiceStatus::Offline),
            "unknown" => Ok(ServiceStatus::Unknown),
            other => Err(format!("unknown service status: {}", other)),
        }
    }
}

/// A registered service link.
///
/// `status` stays `Unknown` and `response_time` stays `None` until the first
/// probe for this service completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub url: String,
    pub status: ServiceStatus,
    /// Latency of the last successful probe in milliseconds.
    pub response_time: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to register a service.
#[derive(Debug, Clone, Deserialize)]
pub struct NewService {
    pub user_id: i64,
    pub name: String,
    pub url: String,
}

/// One persisted probe outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub id: i64,
    pub service_id: i64,
    pub status: ServiceStatus,
    pub response_time: Option<i64>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A status log entry that has not been written yet.
///
/// Built from a [`crate::probe::ProbeResult`], so `response_time` and
/// `error_message` are never both set.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusLogEntry {
    pub service_id: i64,
    pub status: ServiceStatus,
    pub response_time: Option<i64>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

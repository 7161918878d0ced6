//! Probe module for service reachability checks.
//!
//! A probe answers one question about a URL: is it up, and how fast did it
//! answer. Failures are data, so [`Prober::probe`] never returns an error.

mod http;

pub use http::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::db::{NewStatusLogEntry, ServiceStatus};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result of checking a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Online { response_time_ms: i64 },
    Offline { error: String },
}

impl From<Result<i64, ProbeError>> for ProbeOutcome {
    fn from(result: Result<i64, ProbeError>) -> Self {
        match result {
            Ok(response_time_ms) => ProbeOutcome::Online { response_time_ms },
            Err(e) => ProbeOutcome::Offline { error: e.to_string() },
        }
    }
}

/// A completed probe of one service.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub service_id: i64,
    pub outcome: ProbeOutcome,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn status(&self) -> ServiceStatus {
        match self.outcome {
            ProbeOutcome::Online { .. } => ServiceStatus::Online,
            ProbeOutcome::Offline { .. } => ServiceStatus::Offline,
        }
    }

    pub fn response_time(&self) -> Option<i64> {
        match self.outcome {
            ProbeOutcome::Online { response_time_ms } => Some(response_time_ms),
            ProbeOutcome::Offline { .. } => None,
        }
    }

    pub fn to_log_entry(&self) -> NewStatusLogEntry {
        let error_message = match &self.outcome {
            ProbeOutcome::Online { .. } => None,
            ProbeOutcome::Offline { error } => Some(error.clone()),
        };

        NewStatusLogEntry {
            service_id: self.service_id,
            status: self.status(),
            response_time: self.response_time(),
            error_message,
            checked_at: self.checked_at,
        }
    }
}

/// Checks whether a URL is reachable within a deadline.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

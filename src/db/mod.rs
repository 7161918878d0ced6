//! Database module for labdash.
//!
//! Provides SQLite storage with embedded migrations, plus the
//! [`ServiceDirectory`] and [`LogStore`] seams the background workers use.

#[cfg(test)]
pub(crate) mod memory;
mod models;
mod store;

pub use models::*;
pub use store::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read and update access to registered services.
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Every registered service, across all users.
    async fn list_all(&self) -> Result<Vec<Service>, DbError>;

    /// Overwrite the health fields of one service.
    async fn update_health(
        &self,
        id: i64,
        status: ServiceStatus,
        response_time: Option<i64>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError>;
}

/// Append-only history of probe outcomes.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one entry and return its id.
    async fn append(&self, entry: &NewStatusLogEntry) -> Result<i64, DbError>;

    /// Delete every entry with `checked_at` strictly before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError>;

    async fn count_for_service(&self, service_id: i64) -> Result<u64, DbError>;
}

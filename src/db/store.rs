//! SQLite database store implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::{LogStore, ServiceDirectory};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
/// VM instructions between abort checks during long statements.
const ABORT_CHECK_OPS: i32 = 1000;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("blocking database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("statement interrupted")]
    Interrupted,
}

/// Raises its flag when dropped, so a cancelled caller stops the statement it was waiting on.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Enable foreign keys and run embedded migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let report = embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, DbError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    // --- Services ---

    /// Register a service. Health starts out unknown.
    pub fn add_service(&self, service: &NewService) -> Result<Service, DbError> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO services (user_id, name, url, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                service.user_id,
                service.name,
                service.url,
                ServiceStatus::Unknown.as_str(),
                format_db_time(now),
            ],
        )?;

        Ok(Service {
            id: conn.last_insert_rowid(),
            user_id: service.user_id,
            name: service.name.clone(),
            url: service.url.clone(),
            status: ServiceStatus::Unknown,
            response_time: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get all services.
    pub fn list_services(&self) -> Result<Vec<Service>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, url, status, response_time, created_at, updated_at FROM services ORDER BY id",
        )?;

        let services = stmt
            .query_map([], service_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(services)
    }

    /// Get a service by ID.
    pub fn get_service(&self, id: i64) -> Result<Service, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, user_id, name, url, status, response_time, created_at, updated_at FROM services WHERE id = ?1",
            params![id],
            service_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a service. Its status log goes with it.
    pub fn delete_service(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM services WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Overwrite the health fields of a service.
    pub fn update_service_health(
        &self,
        id: i64,
        status: ServiceStatus,
        response_time: Option<i64>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE services SET status = ?1, response_time = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), response_time, format_db_time(updated_at), id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Status Log ---

    /// Append a status log entry and return its ID.
    pub fn add_status_log(&self, entry: &NewStatusLogEntry) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO status_logs (service_id, status, response_time, error_message, checked_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.service_id,
                entry.status.as_str(),
                entry.response_time,
                entry.error_message,
                format_db_time(entry.checked_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get the most recent status log entries for a service, newest first.
    pub fn list_status_logs(&self, service_id: i64, limit: u32) -> Result<Vec<StatusLogEntry>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, service_id, status, response_time, error_message, checked_at FROM status_logs
             WHERE service_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![service_id, limit], |row| {
                let time_str: String = row.get(5)?;
                Ok(StatusLogEntry {
                    id: row.get(0)?,
                    service_id: row.get(1)?,
                    status: status_from_row(row, 2)?,
                    response_time: row.get(3)?,
                    error_message: row.get(4)?,
                    checked_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }

    /// Delete status log entries checked strictly before a cutoff, across all services.
    pub fn delete_status_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        self.delete_status_logs_before_abortable(cutoff, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`Store::delete_status_logs_before`], but gives up once `abort` is set.
    ///
    /// An aborted delete is rolled back and leaves every row in place.
    pub fn delete_status_logs_before_abortable(
        &self,
        cutoff: DateTime<Utc>,
        abort: Arc<AtomicBool>,
    ) -> Result<u64, DbError> {
        let conn = self.conn()?;
        if abort.load(Ordering::SeqCst) {
            return Err(DbError::Interrupted);
        }

        let flag = abort.clone();
        conn.progress_handler(ABORT_CHECK_OPS, Some(move || flag.load(Ordering::SeqCst)));
        let result = conn.execute(
            "DELETE FROM status_logs WHERE checked_at < ?1",
            params![format_db_time(cutoff)],
        );
        conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Ok(deleted) => Ok(deleted as u64),
            Err(_) if abort.load(Ordering::SeqCst) => Err(DbError::Interrupted),
            Err(e) => Err(e.into()),
        }
    }

    /// Count status log entries for a service.
    pub fn count_status_logs(&self, service_id: i64) -> Result<u64, DbError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM status_logs WHERE service_id = ?1",
            params![service_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ServiceDirectory for Store {
    async fn list_all(&self) -> Result<Vec<Service>, DbError> {
        self.blocking(|store| store.list_services()).await
    }

    async fn update_health(
        &self,
        id: i64,
        status: ServiceStatus,
        response_time: Option<i64>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.blocking(move |store| store.update_service_health(id, status, response_time, updated_at))
            .await
    }
}

#[async_trait]
impl LogStore for Store {
    async fn append(&self, entry: &NewStatusLogEntry) -> Result<i64, DbError> {
        let entry = entry.clone();
        self.blocking(move |store| store.add_status_log(&entry)).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        // Dropping this future (e.g. on a sweep timeout) interrupts the delete
        let abort = Arc::new(AtomicBool::new(false));
        let _guard = AbortOnDrop(abort.clone());
        self.blocking(move |store| store.delete_status_logs_before_abortable(cutoff, abort))
            .await
    }

    async fn count_for_service(&self, service_id: i64) -> Result<u64, DbError> {
        self.blocking(move |store| store.count_status_logs(service_id)).await
    }
}

fn service_from_row(row: &Row<'_>) -> SqlResult<Service> {
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    Ok(Service {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        status: status_from_row(row, 4)?,
        response_time: row.get(5)?,
        created_at: parse_db_time(&created_str).unwrap_or_else(Utc::now),
        updated_at: parse_db_time(&updated_str).unwrap_or_else(Utc::now),
    })
}

fn status_from_row(row: &Row<'_>, idx: usize) -> SqlResult<ServiceStatus> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Format a datetime so that text ordering matches time ordering.
fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

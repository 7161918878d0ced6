//! In-memory directory and log store for worker tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{DbError, LogStore, NewStatusLogEntry, Service, ServiceDirectory, ServiceStatus, StatusLogEntry};

#[derive(Default)]
pub(crate) struct MemoryStore {
    services: Mutex<Vec<Service>>,
    logs: Mutex<Vec<StatusLogEntry>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    append_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub(crate) fn with_services(urls: &[&str]) -> Self {
        let store = Self::default();
        let now = Utc::now();
        {
            let mut services = store.services.lock().unwrap();
            for (i, url) in urls.iter().enumerate() {
                services.push(Service {
                    id: i as i64 + 1,
                    user_id: 1,
                    name: format!("service-{}", i + 1),
                    url: url.to_string(),
                    status: ServiceStatus::Unknown,
                    response_time: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        store
    }

    pub(crate) fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make every `append` wait this long before writing.
    pub(crate) fn set_append_delay(&self, delay: Duration) {
        self.append_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn services(&self) -> Vec<Service> {
        self.services.lock().unwrap().clone()
    }

    pub(crate) fn service(&self, id: i64) -> Service {
        self.services().into_iter().find(|s| s.id == id).unwrap()
    }

    pub(crate) fn logs(&self) -> Vec<StatusLogEntry> {
        self.logs.lock().unwrap().clone()
    }

    pub(crate) fn insert_log(&self, service_id: i64, checked_at: DateTime<Utc>) {
        let mut logs = self.logs.lock().unwrap();
        let id = logs.len() as i64 + 1;
        logs.push(StatusLogEntry {
            id,
            service_id,
            status: ServiceStatus::Online,
            response_time: Some(5),
            error_message: None,
            checked_at,
        });
    }
}

#[async_trait]
impl ServiceDirectory for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Service>, DbError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(self.services())
    }

    async fn update_health(
        &self,
        id: i64,
        status: ServiceStatus,
        response_time: Option<i64>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut services = self.services.lock().unwrap();
        let service = services.iter_mut().find(|s| s.id == id).ok_or(DbError::NotFound)?;
        service.status = status;
        service.response_time = response_time;
        service.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append(&self, entry: &NewStatusLogEntry) -> Result<i64, DbError> {
        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut logs = self.logs.lock().unwrap();
        let id = logs.len() as i64 + 1;
        logs.push(StatusLogEntry {
            id,
            service_id: entry.service_id,
            status: entry.status,
            response_time: entry.response_time,
            error_message: entry.error_message.clone(),
            checked_at: entry.checked_at,
        });
        Ok(id)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut logs = self.logs.lock().unwrap();
        let before = logs.len();
        logs.retain(|entry| entry.checked_at >= cutoff);
        Ok((before - logs.len()) as u64)
    }

    async fn count_for_service(&self, service_id: i64) -> Result<u64, DbError> {
        let logs = self.logs.lock().unwrap();
        Ok(logs.iter().filter(|entry| entry.service_id == service_id).count() as u64)
    }
}

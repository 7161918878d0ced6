//! Retention sweeper for trimming old status log entries.

use crate::config::{parse_retention_days, ServerConfig, DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::db::{DbError, LogStore};

use super::lifecycle::{Lifecycle, WorkerState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Delay before the first sweep, so it doesn't compete with startup load.
pub const SWEEP_INITIAL_DELAY: Duration = Duration::from_secs(60 * 60);
/// Time between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound for a single delete.
pub const SWEEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Sweep error types.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("sweep timed out after {0:?}")]
    Timeout(Duration),
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// How long status log history is kept, and how often it is trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub initial_delay: Duration,
    pub sweep_interval: Duration,
    pub sweep_timeout: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    /// Policy keeping `retention_days` of history. Zero means the default.
    pub fn new(retention_days: u32) -> Self {
        let retention_days = match retention_days {
            0 => DEFAULT_RETENTION_DAYS,
            days => days.min(MAX_RETENTION_DAYS),
        };

        Self {
            retention_days,
            initial_delay: SWEEP_INITIAL_DELAY,
            sweep_interval: SWEEP_INTERVAL,
            sweep_timeout: SWEEP_TIMEOUT,
        }
    }

    /// Policy from a raw setting; malformed values fall back to the default.
    pub fn from_setting(raw: Option<&str>) -> Self {
        Self::new(parse_retention_days(raw))
    }

    /// Read `LABDASH_STATUS_LOG_RETENTION_DAYS`.
    pub fn from_env() -> Self {
        Self::from_setting(std::env::var("LABDASH_STATUS_LOG_RETENTION_DAYS").ok().as_deref())
    }

    /// Entries checked strictly before this instant are eligible for deletion.
    ///
    /// `None` when the window reaches past the earliest representable time,
    /// in which case nothing is old enough to delete.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        ChronoDuration::try_days(i64::from(self.retention_days))
            .and_then(|window| now.checked_sub_signed(window))
    }
}

impl From<&ServerConfig> for RetentionPolicy {
    fn from(cfg: &ServerConfig) -> Self {
        Self::new(cfg.retention_days)
    }
}

/// Periodically deletes status log entries older than the retention window.
pub struct RetentionSweeper {
    logs: Arc<dyn LogStore>,
    policy: RetentionPolicy,
    lifecycle: Lifecycle,
}

impl RetentionSweeper {
    pub fn new(logs: Arc<dyn LogStore>, policy: RetentionPolicy) -> Self {
        Self {
            logs,
            policy,
            lifecycle: Lifecycle::new("retention_sweeper"),
        }
    }

    /// The effective policy after validation.
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    /// Schedule the first sweep after the settling delay, then one per interval.
    pub async fn start(&self) {
        let logs = self.logs.clone();
        let policy = self.policy.clone();
        if self
            .lifecycle
            .spawn(|cancel| run_sweep_loop(logs, policy, cancel))
            .await
        {
            tracing::info!(
                retention_days = self.policy.retention_days,
                first_sweep_in_secs = self.policy.initial_delay.as_secs(),
                "Retention sweeper scheduled"
            );
        }
    }

    /// Cancel any pending sweep. A delete already running is left to finish.
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    /// Sweep once, right now.
    pub async fn run_now(&self) -> Result<u64, SweepError> {
        sweep(self.logs.as_ref(), &self.policy, Utc::now()).await
    }

    /// Sweep once as if the current time were `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<u64, SweepError> {
        sweep(self.logs.as_ref(), &self.policy, now).await
    }
}

async fn run_sweep_loop(logs: Arc<dyn LogStore>, policy: RetentionPolicy, cancel: CancellationToken) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(policy.initial_delay) => {}
    }

    // First tick completes immediately and performs the initial sweep
    let mut ticker = tokio::time::interval(policy.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep_and_log(logs.as_ref(), &policy).await;
            }
        }
    }
}

async fn sweep_and_log(logs: &dyn LogStore, policy: &RetentionPolicy) {
    match sweep(logs, policy, Utc::now()).await {
        Ok(0) => tracing::debug!("Retention sweep found nothing to delete"),
        Ok(deleted) => tracing::info!(
            deleted,
            retention_days = policy.retention_days,
            "Deleted old status log entries"
        ),
        Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
    }
}

async fn sweep(logs: &dyn LogStore, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64, SweepError> {
    let Some(cutoff) = policy.cutoff(now) else {
        tracing::debug!(retention_days = policy.retention_days, "Retention window predates all entries");
        return Ok(0);
    };

    match tokio::time::timeout(policy.sweep_timeout, logs.delete_older_than(cutoff)).await {
        Ok(deleted) => Ok(deleted?),
        Err(_) => Err(SweepError::Timeout(policy.sweep_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::NewStatusLogEntry;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    // Mutex to ensure env var tests don't run in parallel
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct StalledStore;

    #[async_trait]
    impl LogStore for StalledStore {
        async fn append(&self, _entry: &NewStatusLogEntry) -> Result<i64, DbError> {
            Ok(1)
        }

        async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, DbError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        }

        async fn count_for_service(&self, _service_id: i64) -> Result<u64, DbError> {
            Ok(0)
        }
    }

    fn days(n: i64) -> ChronoDuration {
        ChronoDuration::days(n)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.retention_days, 30);
        assert_eq!(policy.initial_delay, Duration::from_secs(3600));
        assert_eq!(policy.sweep_interval, Duration::from_secs(86400));
        assert_eq!(policy.sweep_timeout, Duration::from_secs(300));
        assert_eq!(RetentionPolicy::new(0).retention_days, 30);
    }

    #[test]
    fn test_oversized_retention_is_capped() {
        assert_eq!(RetentionPolicy::new(u32::MAX).retention_days, MAX_RETENTION_DAYS);
        assert_eq!(
            RetentionPolicy::from_setting(Some("100000000")).retention_days,
            MAX_RETENTION_DAYS
        );

        let now = Utc::now();
        assert_eq!(
            RetentionPolicy::new(u32::MAX).cutoff(now),
            Some(now - days(i64::from(MAX_RETENTION_DAYS)))
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_cutoff_deletes_nothing() {
        let store = Arc::new(MemoryStore::default());
        store.insert_log(1, Utc::now() - days(400));

        // Fields are public, so the cap in `new` can be bypassed
        let policy = RetentionPolicy {
            retention_days: u32::MAX,
            ..RetentionPolicy::default()
        };
        assert!(policy.cutoff(Utc::now()).is_none());

        let sweeper = RetentionSweeper::new(store.clone(), policy);
        assert_eq!(assert_ok!(sweeper.run_now().await), 0);
        assert_eq!(store.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_capped_setting_sweeps_without_panicking() {
        let store = Arc::new(MemoryStore::default());
        store.insert_log(1, Utc::now() - days(40_000));
        store.insert_log(1, Utc::now() - days(1));

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::from_setting(Some("100000000")));
        assert_eq!(assert_ok!(sweeper.run_now().await), 1);
        assert_eq!(store.logs().len(), 1);
    }

    #[test]
    fn test_malformed_setting_falls_back_to_default() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let store = Arc::new(MemoryStore::default());

        for raw in ["not-a-number", "0", "-3"] {
            std::env::set_var("LABDASH_STATUS_LOG_RETENTION_DAYS", raw);
            let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::from_env());
            assert_eq!(sweeper.policy().retention_days, 30, "setting {:?}", raw);
        }

        std::env::set_var("LABDASH_STATUS_LOG_RETENTION_DAYS", "14");
        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::from_env());
        assert_eq!(sweeper.policy().retention_days, 14);

        std::env::remove_var("LABDASH_STATUS_LOG_RETENTION_DAYS");
        let sweeper = RetentionSweeper::new(store, RetentionPolicy::from_env());
        assert_eq!(sweeper.policy().retention_days, 30);
    }

    #[tokio::test]
    async fn test_boundary_entry_is_retained() {
        let store = Arc::new(MemoryStore::default());
        let now = Utc::now();
        store.insert_log(1, now - days(9));
        store.insert_log(1, now - days(10));
        store.insert_log(1, now - days(11));

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::new(10));
        let deleted = assert_ok!(sweeper.run_at(now).await);

        assert_eq!(deleted, 1);
        let remaining: Vec<_> = store.logs().into_iter().map(|e| e.checked_at).collect();
        assert_eq!(remaining, vec![now - days(9), now - days(10)]);
    }

    #[tokio::test]
    async fn test_run_now_with_nothing_to_delete() {
        let store = Arc::new(MemoryStore::default());
        store.insert_log(1, Utc::now() - days(1));

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::default());
        assert_eq!(assert_ok!(sweeper.run_now().await), 0);
        assert_eq!(store.logs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_times_out() {
        let sweeper = RetentionSweeper::new(Arc::new(StalledStore), RetentionPolicy::default());

        let err = assert_err!(sweeper.run_now().await);
        assert!(matches!(err, SweepError::Timeout(d) if d == SWEEP_TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sweep_waits_for_settling_delay() {
        let store = Arc::new(MemoryStore::default());
        store.insert_log(1, Utc::now() - days(45));
        store.insert_log(2, Utc::now() - days(2));

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::default());
        sweeper.start().await;
        assert_eq!(sweeper.state().await, WorkerState::Running);

        tokio::time::sleep(Duration::from_secs(59 * 60)).await;
        assert_eq!(store.logs().len(), 2);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(store.logs().len(), 1);

        // Next sweep a day later picks up newly expired entries
        store.insert_log(3, Utc::now() - days(31));
        tokio::time::sleep(SWEEP_INTERVAL).await;
        assert_eq!(store.logs().len(), 1);

        sweeper.stop().await;
        assert_eq!(sweeper.state().await, WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_initial_sweep() {
        let store = Arc::new(MemoryStore::default());
        store.insert_log(1, Utc::now() - days(90));

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::default());
        sweeper.start().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        sweeper.stop().await;

        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(store.logs().len(), 1);
    }
}

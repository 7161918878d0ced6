//! Background workers: the probe scheduler and the status log retention sweeper.

mod lifecycle;
mod retention;

pub use lifecycle::WorkerState;
pub use retention::*;

use crate::config::ServerConfig;
use crate::db::{LogStore, Service, ServiceDirectory, ServiceStatus};
use crate::probe::{ProbeError, ProbeOutcome, ProbeResult, Prober};

use chrono::Utc;
use lifecycle::Lifecycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Tuning for the probe scheduler.
#[derive(Debug, Clone)]
pub struct ProbeSchedulerConfig {
    /// Time between cycles. Also the deadline for a single cycle.
    pub interval: Duration,
    /// Maximum probes in flight at once.
    pub max_concurrent: usize,
    /// Upper bound for one probe, clipped to what is left of the cycle.
    pub probe_timeout: Duration,
}

impl Default for ProbeSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_concurrent: 10,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerConfig> for ProbeSchedulerConfig {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            interval: cfg.check_interval(),
            max_concurrent: cfg.max_concurrent_checks,
            probe_timeout: cfg.probe_timeout(),
        }
    }
}

/// Tally of one probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Probes dispatched.
    pub services: usize,
    pub online: usize,
    pub offline: usize,
    /// Probes dropped without writing anything (deadline or shutdown).
    pub abandoned: usize,
    /// The service list could not be fetched.
    pub skipped: bool,
}

enum ProbeDisposition {
    Recorded(ServiceStatus),
    Abandoned,
}

struct ProbeContext {
    directory: Arc<dyn ServiceDirectory>,
    logs: Arc<dyn LogStore>,
    prober: Arc<dyn Prober>,
    config: ProbeSchedulerConfig,
    // Shared by overlapping cycles so the ceiling holds fleet-wide
    permits: Semaphore,
}

/// Periodically probes every registered service.
pub struct ProbeScheduler {
    ctx: Arc<ProbeContext>,
    lifecycle: Lifecycle,
}

impl ProbeScheduler {
    pub fn new(
        directory: Arc<dyn ServiceDirectory>,
        logs: Arc<dyn LogStore>,
        prober: Arc<dyn Prober>,
        config: ProbeSchedulerConfig,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            ctx: Arc::new(ProbeContext {
                directory,
                logs,
                prober,
                config,
                permits,
            }),
            lifecycle: Lifecycle::new("probe_scheduler"),
        }
    }

    pub fn config(&self) -> &ProbeSchedulerConfig {
        &self.ctx.config
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    /// Start probing in the background. The first cycle runs right away.
    pub async fn start(&self) {
        let ctx = self.ctx.clone();
        if self.lifecycle.spawn(|cancel| run_probe_loop(ctx, cancel)).await {
            tracing::info!(
                interval_secs = self.ctx.config.interval.as_secs(),
                max_concurrent = self.ctx.config.max_concurrent,
                "Probe scheduler running"
            );
        }
    }

    /// Stop ticking and wait until every in-flight cycle has finished.
    ///
    /// No status is written once this returns.
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    /// Run a single cycle outside of the timer loop.
    pub async fn run_cycle(&self) -> CycleSummary {
        run_cycle(self.ctx.clone(), self.lifecycle.token()).await
    }
}

async fn run_probe_loop(ctx: Arc<ProbeContext>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                log_cycle(joined);
            }
            _ = ticker.tick() => {
                if !cycles.is_empty() {
                    tracing::debug!(running = cycles.len(), "Previous cycle still draining");
                }
                cycles.spawn(run_cycle(ctx.clone(), cancel.clone()));
            }
        }
    }

    tracing::info!(running = cycles.len(), "Probe scheduler draining in-flight cycles");
    while let Some(joined) = cycles.join_next().await {
        log_cycle(joined);
    }
}

fn log_cycle(joined: Result<CycleSummary, JoinError>) {
    match joined {
        Ok(summary) if !summary.skipped => {
            tracing::debug!(
                services = summary.services,
                online = summary.online,
                offline = summary.offline,
                abandoned = summary.abandoned,
                "Probe cycle complete"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Probe cycle task failed"),
    }
}

/// Fetch all services and probe them, at most `max_concurrent` at a time.
async fn run_cycle(ctx: Arc<ProbeContext>, cancel: CancellationToken) -> CycleSummary {
    let services = match ctx.directory.list_all().await {
        Ok(services) => services,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list services, skipping cycle");
            return CycleSummary {
                skipped: true,
                ..Default::default()
            };
        }
    };

    if services.is_empty() || cancel.is_cancelled() {
        return CycleSummary::default();
    }

    let deadline = Instant::now() + ctx.config.interval;
    let mut probes = JoinSet::new();
    for service in services {
        probes.spawn(probe_service(ctx.clone(), service, deadline, cancel.clone()));
    }

    let mut summary = CycleSummary {
        services: probes.len(),
        ..Default::default()
    };

    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(ProbeDisposition::Recorded(ServiceStatus::Online)) => summary.online += 1,
            Ok(ProbeDisposition::Recorded(_)) => summary.offline += 1,
            Ok(ProbeDisposition::Abandoned) => summary.abandoned += 1,
            Err(e) => {
                tracing::error!(error = %e, "Probe task failed");
                summary.abandoned += 1;
            }
        }
    }

    summary
}

async fn probe_service(
    ctx: Arc<ProbeContext>,
    service: Service,
    deadline: Instant,
    cancel: CancellationToken,
) -> ProbeDisposition {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ProbeDisposition::Abandoned,
        acquired = tokio::time::timeout_at(deadline, ctx.permits.acquire()) => match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return ProbeDisposition::Abandoned,
            Err(_) => {
                tracing::warn!(
                    service_id = service.id,
                    url = %service.url,
                    "No probe slot freed up before the cycle deadline"
                );
                return ProbeDisposition::Abandoned;
            }
        },
    };

    let started = Instant::now();
    let probe_deadline = deadline.min(started + ctx.config.probe_timeout);
    let budget = probe_deadline.saturating_duration_since(started);

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ProbeDisposition::Abandoned,
        probed = tokio::time::timeout_at(probe_deadline, ctx.prober.probe(&service.url, budget)) => {
            probed.unwrap_or_else(|_| ProbeOutcome::Offline {
                error: ProbeError::Timeout(budget).to_string(),
            })
        }
    };

    let result = ProbeResult {
        service_id: service.id,
        outcome,
        checked_at: Utc::now(),
    };
    record_result(&ctx, &result).await;

    ProbeDisposition::Recorded(result.status())
}

/// Write the service's health fields and append a status log entry.
async fn record_result(ctx: &ProbeContext, result: &ProbeResult) {
    if let Err(e) = ctx
        .directory
        .update_health(
            result.service_id,
            result.status(),
            result.response_time(),
            result.checked_at,
        )
        .await
    {
        tracing::error!(service_id = result.service_id, error = %e, "Failed to update service health");
    }

    if let Err(e) = ctx.logs.append(&result.to_log_entry()).await {
        tracing::error!(service_id = result.service_id, error = %e, "Failed to append status log");
    }
}

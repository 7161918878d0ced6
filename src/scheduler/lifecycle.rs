//! Start/stop plumbing shared by the background workers.
//!
//! A worker moves `Idle -> Running -> Stopping -> Stopped` and never comes
//! back. Out-of-order calls are logged and ignored.

use serde::Serialize;
use std::future::Future;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct Inner {
    state: WorkerState,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct Lifecycle {
    name: &'static str,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl Lifecycle {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: WorkerState::Idle,
                handle: None,
            }),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) async fn state(&self) -> WorkerState {
        self.inner.lock().await.state
    }

    /// Spawn the worker loop. Returns false if the worker was already started.
    pub(crate) async fn spawn<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        if inner.state != WorkerState::Idle {
            tracing::warn!(worker = self.name, state = ?inner.state, "Ignoring start request");
            return false;
        }

        inner.handle = Some(tokio::spawn(run(self.cancel.clone())));
        inner.state = WorkerState::Running;
        tracing::info!(worker = self.name, "Worker started");
        true
    }

    /// Cancel the loop and wait for it to exit.
    pub(crate) async fn stop(&self) {
        let handle = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                WorkerState::Idle => {
                    tracing::warn!(worker = self.name, "Stop requested before start; worker will not run");
                    self.cancel.cancel();
                    inner.state = WorkerState::Stopped;
                    return;
                }
                WorkerState::Stopping | WorkerState::Stopped => {
                    tracing::warn!(worker = self.name, state = ?inner.state, "Ignoring stop request");
                    return;
                }
                WorkerState::Running => {
                    inner.state = WorkerState::Stopping;
                    inner.handle.take()
                }
            }
        };

        self.cancel.cancel();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(worker = self.name, error = %e, "Worker task failed");
            }
        }

        self.inner.lock().await.state = WorkerState::Stopped;
        tracing::info!(worker = self.name, "Worker stopped");
    }
}

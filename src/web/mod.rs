//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::{ProbeScheduler, RetentionSweeper};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<ProbeScheduler>,
    pub sweeper: Arc<RetentionSweeper>,
}

/// Web server for labdash.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        scheduler: Arc<ProbeScheduler>,
        sweeper: Arc<RetentionSweeper>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                sweeper,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/healthz", get(handlers::handle_healthz))
            // Services
            .route(
                "/api/services",
                get(handlers::handle_list_services).post(handlers::handle_create_service),
            )
            .route(
                "/api/services/{id}",
                get(handlers::handle_get_service).delete(handlers::handle_delete_service),
            )
            .route("/api/services/{id}/history", get(handlers::handle_service_history))
            // Background workers
            .route("/api/admin/workers", get(handlers::handle_worker_status))
            .route("/api/admin/retention/run", post(handlers::handle_run_retention))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

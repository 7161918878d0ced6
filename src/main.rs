//! labdash - homelab dashboard backend.

use labdash::config::ServerConfig;
use labdash::db::Store;
use labdash::probe::HttpProber;
use labdash::scheduler::{ProbeScheduler, ProbeSchedulerConfig, RetentionPolicy, RetentionSweeper};
use labdash::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("labdash=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting labdash on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Background workers
    let prober = Arc::new(HttpProber::new()?);
    let scheduler = Arc::new(ProbeScheduler::new(
        store.clone(),
        store.clone(),
        prober,
        ProbeSchedulerConfig::from(&cfg),
    ));
    let sweeper = Arc::new(RetentionSweeper::new(store.clone(), RetentionPolicy::from(&cfg)));

    scheduler.start().await;
    sweeper.start().await;

    // Serve until a shutdown signal arrives
    let server = Server::new(cfg, store, scheduler.clone(), sweeper.clone());
    let served = server.start(shutdown_signal()).await;

    tracing::info!("Shutting down background workers");
    scheduler.stop().await;
    sweeper.stop().await;

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

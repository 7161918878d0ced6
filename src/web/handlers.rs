//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, NewService};
use crate::scheduler::WorkerState;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 1000;

fn db_error_response(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Service not found").into_response(),
        other => {
            tracing::error!(error = %other, "Store request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response()
        }
    }
}

pub async fn handle_healthz() -> &'static str {
    "ok"
}

// ============================================================================
// API: Services
// ============================================================================

pub async fn handle_list_services(State(state): State<AppState>) -> Response {
    match state.store.list_services() {
        Ok(services) => Json(services).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_get_service(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_service(id) {
        Ok(service) => Json(service).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_create_service(
    State(state): State<AppState>,
    Json(req): Json<NewService>,
) -> Response {
    let name = req.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "Service name is required").into_response();
    }

    let url = req.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return (StatusCode::BAD_REQUEST, "Service URL must start with http:// or https://")
            .into_response();
    }

    let service = NewService {
        user_id: req.user_id,
        name: name.to_string(),
        url: url.to_string(),
    };

    match state.store.add_service(&service) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_delete_service(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_service(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_service_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if let Err(e) = state.store.get_service(id) {
        return db_error_response(e);
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match state.store.list_status_logs(id, limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// API: Background workers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    pub probe_scheduler: WorkerState,
    pub retention_sweeper: WorkerState,
    pub check_interval_secs: u64,
    pub max_concurrent_checks: usize,
    pub retention_days: u32,
}

pub async fn handle_worker_status(State(state): State<AppState>) -> Json<WorkerStatusResponse> {
    Json(WorkerStatusResponse {
        probe_scheduler: state.scheduler.state().await,
        retention_sweeper: state.sweeper.state().await,
        check_interval_secs: state.scheduler.config().interval.as_secs(),
        max_concurrent_checks: state.scheduler.config().max_concurrent,
        retention_days: state.sweeper.policy().retention_days,
    })
}

#[derive(Debug, Serialize)]
pub struct RetentionRunResponse {
    pub deleted: u64,
}

pub async fn handle_run_retention(State(state): State<AppState>) -> Response {
    match state.sweeper.run_now().await {
        Ok(deleted) => {
            tracing::info!(deleted, "Manual retention sweep finished");
            Json(RetentionRunResponse { deleted }).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Manual retention sweep failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::background_jobs::{JobError, SchedulerHandle};
use crate::transfer::{SqliteTransferStore, TransferStatus};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{log_requests, metrics, state::*, RequestsLoggingLevel, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct EffectuateResponse {
    status: &'static str,
    processed: usize,
}

/// Run transfer effectuation now instead of waiting for the next tick.
///
/// Goes through the same cluster lock as the scheduled run. Contention is
/// reported to the caller as 409 so an operator can tell "another instance
/// is on it" apart from "it actually broke".
async fn effectuate_transfers(State(scheduler): State<SchedulerHandle>) -> Response {
    match scheduler.trigger_effectuation().await {
        Ok(processed) => Json(EffectuateResponse {
            status: "success",
            processed,
        })
        .into_response(),
        Err(e @ JobError::LockContention) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e @ JobError::SchedulerUnavailable) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e @ JobError::ExecutionFailed(_)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Serialize)]
struct JobStatusResponse {
    last_run: Option<crate::background_jobs::JobRunInfo>,
}

async fn get_job_status(State(scheduler): State<SchedulerHandle>) -> Response {
    match scheduler.get_last_run() {
        Ok(last_run) => Json(JobStatusResponse { last_run }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

#[derive(Deserialize, Debug)]
struct HistoryQuery {
    limit: Option<usize>,
}

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

async fn get_job_history(
    State(scheduler): State<SchedulerHandle>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    match scheduler.get_run_history(limit) {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

#[derive(Deserialize, Debug)]
struct CreateTransferBody {
    pub asset_id: String,
    pub from_location: String,
    pub to_location: String,
    /// RFC3339 timestamp from which the transfer may be effectuated.
    pub effective_date: String,
}

async fn post_transfer(
    State(store): State<GuardedTransferStore>,
    Json(body): Json<CreateTransferBody>,
) -> Response {
    let effective_date = match DateTime::parse_from_rfc3339(&body.effective_date) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid effective_date: {}", e),
            )
        }
    };
    match store.create_transfer(
        &body.asset_id,
        &body.from_location,
        &body.to_location,
        effective_date,
    ) {
        Ok(id) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

async fn get_transfer_by_id(
    State(store): State<GuardedTransferStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_transfer(id) {
        Ok(Some(transfer)) => Json(transfer).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

#[derive(Deserialize, Debug)]
struct DecideTransferBody {
    pub status: TransferStatus,
    pub decided_by: Option<String>,
}

/// Decide a transfer: accept, reject, or cancel.
///
/// Only those three statuses are decisions. `completed` is reserved for
/// the effectuation job (it alone stamps `completed_at`), and a terminal
/// transfer must never be moved back to a re-effectuatable state.
async fn put_transfer_decision(
    State(store): State<GuardedTransferStore>,
    Path(id): Path<i64>,
    Json(body): Json<DecideTransferBody>,
) -> Response {
    match body.status {
        TransferStatus::Accepted | TransferStatus::Rejected | TransferStatus::Cancelled => {}
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("'{}' is not a decision status", other.as_str()),
            )
        }
    }

    let current = match store.get_transfer(id) {
        Ok(Some(transfer)) => transfer,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    };
    let allowed = match current.status {
        TransferStatus::Pending => true,
        // An accepted transfer may still be cancelled before it is due.
        TransferStatus::Accepted => body.status == TransferStatus::Cancelled,
        _ => false,
    };
    if !allowed {
        return error_response(
            StatusCode::CONFLICT,
            format!(
                "Transfer {} is {} and cannot become {}",
                id,
                current.status.as_str(),
                body.status.as_str()
            ),
        );
    }

    match store.set_transfer_status(id, body.status, body.decided_by.as_deref()) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

#[derive(Deserialize, Debug)]
struct TransfersQuery {
    status: TransferStatus,
    limit: Option<usize>,
}

async fn list_transfers(
    State(store): State<GuardedTransferStore>,
    Query(query): Query<TransfersQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    match store.list_transfers_by_status(query.status, limit) {
        Ok(transfers) => Json(transfers).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

fn make_app(
    config: ServerConfig,
    scheduler_handle: SchedulerHandle,
    transfer_store: Arc<SqliteTransferStore>,
    hash: String,
) -> Router {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        scheduler_handle,
        transfer_store,
        hash,
    };

    let admin_routes: Router = Router::new()
        .route("/transfers", post(post_transfer))
        .route("/transfers", get(list_transfers))
        .route("/transfers/{id}", get(get_transfer_by_id))
        .route("/transfers/{id}/decision", put(put_transfer_decision))
        .route("/transfers/effectuate", post(effectuate_transfers))
        .route("/jobs/transfer_effectuation", get(get_job_status))
        .route("/jobs/transfer_effectuation/history", get(get_job_history))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state.clone())
        .nest("/v1/admin", admin_routes);

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server(
    scheduler_handle: SchedulerHandle,
    transfer_store: Arc<SqliteTransferStore>,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    hash: String,
) -> Result<()> {
    let config = ServerConfig {
        port,
        requests_logging_level,
    };
    let app = make_app(config, scheduler_handle, transfer_store, hash);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app).await?)
}

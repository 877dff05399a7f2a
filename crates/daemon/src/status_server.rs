//! Status HTTP server for bulletproof
//!
//! Serves the published status snapshot as JSON and exposes pause/resume.

use crate::jobs::Job;
use crate::monitor::MonitorHandle;
use crate::queue::JobCounts;
use crate::rules::Rule;
use crate::status::{CurrentJob, ServiceState, StatusSnapshot, RECENT_HISTORY_LEN};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    handle: MonitorHandle,
    rules: Arc<Vec<Rule>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: ServiceState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueResponse {
    pub counts: JobCounts,
    pub current_job: Option<CurrentJob>,
    pub active_jobs: Vec<Job>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn health(State(app): State<AppState>) -> Json<HealthResponse> {
    let state = app.handle.status().read().await.state;
    Json(HealthResponse {
        status: "ok".to_string(),
        state,
    })
}

async fn get_status(State(app): State<AppState>) -> Json<StatusSnapshot> {
    Json(app.handle.snapshot().await)
}

async fn get_queue(State(app): State<AppState>) -> Json<QueueResponse> {
    let status = app.handle.status();
    let snapshot = status.read().await;
    Json(QueueResponse {
        counts: snapshot.counts,
        current_job: snapshot.current_job.clone(),
        active_jobs: snapshot.active_jobs.clone(),
    })
}

async fn get_history(
    State(app): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<Job>> {
    let status = app.handle.status();
    let snapshot = status.read().await;
    let limit = params.limit.unwrap_or(RECENT_HISTORY_LEN);
    Json(snapshot.history(limit).to_vec())
}

async fn get_job(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let status = app.handle.status();
    let snapshot = status.read().await;
    match snapshot.find_job(&id) {
        Some(job) => Json(job.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Job not found: {}", id) })),
        )
            .into_response(),
    }
}

async fn get_rules(State(app): State<AppState>) -> Json<Vec<Rule>> {
    Json(app.rules.as_ref().clone())
}

async fn pause(State(app): State<AppState>) -> Json<ControlResponse> {
    app.handle.pause();
    Json(ControlResponse {
        paused: app.handle.is_paused(),
    })
}

async fn resume(State(app): State<AppState>) -> Json<ControlResponse> {
    app.handle.resume();
    Json(ControlResponse {
        paused: app.handle.is_paused(),
    })
}

/// Creates the axum Router with the status endpoints
pub fn create_status_router(handle: MonitorHandle, rules: Vec<Rule>) -> Router {
    let state = AppState {
        handle,
        rules: Arc::new(rules),
    };

    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/queue", get(get_queue))
        .route("/history", get(get_history))
        .route("/jobs/:id", get(get_job))
        .route("/rules", get(get_rules))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .with_state(state)
}

/// Serve `router` on `addr` until `cancel` fires.
pub async fn run_status_server(
    addr: &str,
    router: Router,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Status server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

//! Runner registration, heartbeat and dispatch endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use conveyor_core::job::JobState;
use conveyor_core::runner::{RunnerInfo, RunnerRegistration, RunnerStatus};
use conveyor_core::{JobId, RunnerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_runners))
        .route("/available", get(available_runners))
        .route("/register", post(register_runner))
        .route("/{id}", delete(unregister_runner))
        .route("/{id}/heartbeat", post(heartbeat))
        .route("/{id}/status", put(set_status))
        .route("/{id}/jobs/request", post(request_job))
        .route("/{id}/jobs/{job_id}/complete", post(complete_job))
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    runner_id: RunnerId,
}

async fn register_runner(
    State(state): State<AppState>,
    Json(registration): Json<RunnerRegistration>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if registration.name.trim().is_empty() {
        return Err(ApiError::BadRequest("runner name is empty".to_string()));
    }
    let runner_id = state.scheduler.register_runner(registration);
    Ok((StatusCode::CREATED, Json(RegisterResponse { runner_id })))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<RunnerId>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler.heartbeat(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("runner {} is not registered", id)))
    }
}

async fn unregister_runner(State(state): State<AppState>, Path(id): Path<RunnerId>) -> StatusCode {
    state.scheduler.unregister_runner(id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: RunnerStatus,
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<RunnerId>,
    Json(req): Json<SetStatusRequest>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler.set_runner_status(id, req.status) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("runner {} is not registered", id)))
    }
}

async fn request_job(State(state): State<AppState>, Path(id): Path<RunnerId>) -> Response {
    match state.scheduler.request_job(id) {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CompleteJobRequest {
    status: JobState,
}

async fn complete_job(
    State(state): State<AppState>,
    Path((id, job_id)): Path<(RunnerId, JobId)>,
    Json(req): Json<CompleteJobRequest>,
) -> Result<StatusCode, ApiError> {
    if !req.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "{} is not a terminal status",
            req.status
        )));
    }
    state.scheduler.report_job_completion(id, job_id, req.status);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_runners(State(state): State<AppState>) -> Json<Vec<RunnerInfo>> {
    Json(state.scheduler.active_runners())
}

#[derive(Debug, Deserialize)]
struct AvailableQuery {
    capabilities: Option<String>,
}

async fn available_runners(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> Json<Vec<RunnerInfo>> {
    let required: BTreeSet<String> = query
        .capabilities
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    Json(state.scheduler.available_runners(&required))
}

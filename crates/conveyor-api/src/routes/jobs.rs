//! Job submission, cancellation, status and log endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use conveyor_core::job::{Job, JobSpec, JobStatus, Priority};
use conveyor_core::{JobId, StepId};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::AppState;
use crate::error::ApiError;

/// Response header carrying the offset to continue a log read from.
pub const NEXT_OFFSET_HEADER: &str = "x-next-offset";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/assignable", get(assignable_jobs))
        .route("/{id}", get(get_job).delete(cancel_job))
        .route("/{id}/logs", get(read_logs).post(append_logs))
        .route("/{id}/cancellation", get(cancellation))
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    job: JobSpec,
    #[serde(default)]
    priority: Priority,
}

#[derive(Debug, Serialize)]
struct SubmitJobResponse {
    job_id: JobId,
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let job = Job::from_spec(req.job);
    match state.scheduler.submit(job, req.priority) {
        Ok(job_id) => Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id }))),
        Err(e) => {
            error!(error = %e, "Job submission failed");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    success: bool,
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<CancelResponse>, ApiError> {
    if state.scheduler.cancel_job(id) {
        Ok(Json(CancelResponse { success: true }))
    } else {
        Err(ApiError::NotFound(format!("job {} not found", id)))
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobStatus>, ApiError> {
    state
        .scheduler
        .job_status(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", id)))
}

async fn assignable_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.scheduler.assignable_jobs())
}

#[derive(Debug, Deserialize)]
struct ReadLogsQuery {
    step: Option<StepId>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

async fn read_logs(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Query(query): Query<ReadLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let chunk = state
        .scheduler
        .logs()
        .read(id, query.step, query.offset, query.limit)
        .ok_or_else(|| ApiError::NotFound(format!("no logs for job {}", id)))?;
    Ok((
        [(NEXT_OFFSET_HEADER, chunk.next_offset.to_string())],
        chunk.data,
    ))
}

#[derive(Debug, Deserialize)]
struct AppendLogsQuery {
    step: Option<StepId>,
}

async fn append_logs(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Query(query): Query<AppendLogsQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.scheduler.append_log(id, query.step, &body)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct CancellationResponse {
    requested: bool,
}

async fn cancellation(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Json<CancellationResponse> {
    Json(CancellationResponse {
        requested: state.scheduler.is_cancellation_requested(id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app, body_bytes, body_json, send};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::json;
    use tower::util::ServiceExt;

    fn job_body(priority: &str) -> serde_json::Value {
        json!({
            "job": {
                "name": "build",
                "steps": [
                    { "name": "compile", "image": "rust:1.85", "commands": ["cargo build"] }
                ]
            },
            "priority": priority
        })
    }

    #[tokio::test]
    async fn test_submit_job_returns_accepted() {
        let (router, scheduler) = app();
        let response = send(&router, Method::POST, "/api/v1/jobs", Some(job_body("high"))).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        let job_id: JobId = body["job_id"].as_str().unwrap().parse().unwrap();
        let status = scheduler.job_status(job_id).unwrap();
        assert_eq!(status.priority, Priority::High);
        assert_eq!(scheduler.statistics().pending_jobs, 1);
    }

    #[tokio::test]
    async fn test_submit_invalid_job_fails() {
        let (router, _) = app();
        let body = json!({ "job": { "name": "empty", "steps": [] } });
        let response = send(&router, Method::POST, "/api/v1/jobs", Some(body)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(response).await["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_cancel_and_status() {
        let (router, _) = app();
        let response = send(&router, Method::POST, "/api/v1/jobs", Some(job_body("normal"))).await;
        let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/jobs/{}", job_id);
        let response = send(&router, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "success": true }));

        let response = send(&router, Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["status"], "canceled");
        assert!(!status["completed_at"].is_null());

        let uri = format!("/api/v1/jobs/{}/cancellation", job_id);
        let response = send(&router, Method::GET, &uri, None).await;
        assert_eq!(body_json(response).await, json!({ "requested": true }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_not_found() {
        let (router, _) = app();
        let uri = format!("/api/v1/jobs/{}", JobId::new());
        let response = send(&router, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&router, Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_assignable_jobs_in_priority_order() {
        let (router, _) = app();
        send(&router, Method::POST, "/api/v1/jobs", Some(job_body("low"))).await;
        send(&router, Method::POST, "/api/v1/jobs", Some(job_body("critical"))).await;

        let response = send(&router, Method::GET, "/api/v1/jobs/assignable", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let jobs = body_json(response).await;
        assert_eq!(jobs.as_array().unwrap().len(), 2);
    }

    async fn post_log(router: &Router, uri: &str, body: &'static str) -> StatusCode {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        router.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_log_append_and_paged_read() {
        let (router, _) = app();
        let response = send(&router, Method::POST, "/api/v1/jobs", Some(job_body("normal"))).await;
        let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();
        let step_id = StepId::new();
        let uri = format!("/api/v1/jobs/{}/logs?step={}", job_id, step_id);
        assert_eq!(post_log(&router, &uri, "hello world").await, StatusCode::NO_CONTENT);

        let uri = format!("/api/v1/jobs/{}/logs?offset=6&limit=3", job_id);
        let response = send(&router, Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[NEXT_OFFSET_HEADER], "9");
        assert_eq!(&body_bytes(response).await[..], b"wor");

        let uri = format!("/api/v1/jobs/{}/logs", JobId::new());
        let response = send(&router, Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_log_append_for_unknown_job_is_not_found() {
        let (router, scheduler) = app();
        let uri = format!("/api/v1/jobs/{}/logs", JobId::new());
        assert_eq!(post_log(&router, &uri, "noise").await, StatusCode::NOT_FOUND);
        assert_eq!(scheduler.logs().job_count(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (router, _) = app();
        send(&router, Method::POST, "/api/v1/jobs", Some(job_body("normal"))).await;
        let response = send(&router, Method::GET, "/api/v1/stats", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["pending_jobs"], 1);
        assert_eq!(stats["total_runners"], 0);
    }
}

//! Queue statistics endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use conveyor_core::job::QueueStatistics;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}

async fn stats(State(state): State<AppState>) -> Json<QueueStatistics> {
    Json(state.scheduler.statistics())
}

//! API routes.

pub mod health;
pub mod jobs;
pub mod runners;
pub mod stats;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/runners", runners::router())
        .merge(stats::router())
}

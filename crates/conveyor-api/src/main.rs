//! Conveyor scheduler server.

use anyhow::Context;
use conveyor_api::shutdown::install_shutdown_handler;
use conveyor_api::{AppState, routes};
use conveyor_config::load_system_config;
use conveyor_scheduler::CleanupLoop;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("CONVEYOR_CONFIG").unwrap_or_else(|_| "conveyor.kdl".to_string());
    let config = load_system_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    info!(path = %config_path, "Configuration loaded");

    let state = AppState::new(&config.scheduler);
    let shutdown = install_shutdown_handler();

    let cleanup = CleanupLoop::from_config(state.scheduler.clone(), &config.scheduler);
    let cleanup_handle = tokio::spawn(cleanup.run(shutdown.clone()));

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.scheduler.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.scheduler.listen))?;
    info!("Starting server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    cleanup_handle.await?;
    info!("Server stopped");

    Ok(())
}

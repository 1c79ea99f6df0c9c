//! The `runner` command: run an agent against a remote scheduler.

use anyhow::{Context, Result};
use conveyor_config::RunnerConfig;
use conveyor_executor::{DockerRuntime, HttpSchedulerClient, JobRunner, RunnerAgent, StepRunner};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(config: RunnerConfig, api_url: &str) -> Result<()> {
    let client = Arc::new(HttpSchedulerClient::new(api_url)?);

    let runtime = DockerRuntime::new().context("Failed to connect to Docker")?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not reachable")?;

    let steps = StepRunner::from_config(Arc::new(runtime), client.clone(), &config);
    info!(name = %config.name, api_url, slots = config.max_concurrent_jobs, "Starting runner");
    let agent = Arc::new(RunnerAgent::new(config, client, JobRunner::new(steps)));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping runner");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    agent.run(shutdown).await?;
    info!("Runner stopped");
    Ok(())
}

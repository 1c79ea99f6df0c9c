//! Runner inspection commands.

use anyhow::{Context, Result};
use conveyor_core::RunnerId;
use conveyor_core::runner::{RunnerInfo, RunnerStatus};
use serde::Serialize;

use super::ApiClient;

pub async fn list(api: &ApiClient) -> Result<()> {
    let runners: Vec<RunnerInfo> = api.get("runners").await?;
    print_runners(&runners);
    Ok(())
}

pub async fn available(api: &ApiClient, capabilities: Option<&str>) -> Result<()> {
    let path = match capabilities {
        Some(caps) => format!("runners/available?capabilities={}", caps),
        None => "runners/available".to_string(),
    };
    let runners: Vec<RunnerInfo> = api.get(&path).await?;
    print_runners(&runners);
    Ok(())
}

#[derive(Serialize)]
struct SetStatusRequest {
    status: RunnerStatus,
}

pub async fn set_status(api: &ApiClient, id: &str, status: &str) -> Result<()> {
    let id: RunnerId = id.parse().context("Invalid runner id")?;
    let status: RunnerStatus = status.parse()?;
    api.put(&format!("runners/{}/status", id), &SetStatusRequest { status })
        .await?;
    println!("Runner {} is now {:?}", id, status);
    Ok(())
}

fn print_runners(runners: &[RunnerInfo]) {
    if runners.is_empty() {
        println!("No runners");
        return;
    }
    for runner in runners {
        let capabilities: Vec<&str> = runner.capabilities.iter().map(String::as_str).collect();
        println!(
            "{}  {:<16} {:?}  {}/{} jobs  [{}]",
            runner.id,
            runner.name,
            runner.status,
            runner.current_jobs,
            runner.max_concurrent_jobs,
            capabilities.join(", ")
        );
    }
}

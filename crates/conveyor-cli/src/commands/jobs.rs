//! Job commands.

use anyhow::{Context, Result};
use conveyor_core::JobId;
use conveyor_core::job::{Job, JobSpec, JobStatus, Priority, QueueStatistics};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

use super::ApiClient;

const FOLLOW_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct SubmitRequest {
    job: JobSpec,
    priority: Priority,
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: JobId,
}

#[derive(Deserialize)]
struct CancelResponse {
    success: bool,
}

pub async fn submit(api: &ApiClient, path: &str, priority: &str) -> Result<()> {
    let priority: Priority = priority.parse()?;
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let job = conveyor_config::parse_job(&content)?;
    let name = job.name.clone();

    let response: SubmitResponse = api.post("jobs", &SubmitRequest { job, priority }).await?;
    println!("Submitted job '{}' as {} ({})", name, response.job_id, priority);
    Ok(())
}

pub async fn cancel(api: &ApiClient, id: &str) -> Result<()> {
    let id: JobId = id.parse().context("Invalid job id")?;
    let response: CancelResponse = api.delete(&format!("jobs/{}", id)).await?;
    if response.success {
        println!("Cancellation requested for job {}", id);
    }
    Ok(())
}

pub async fn status(api: &ApiClient, id: &str) -> Result<()> {
    let id: JobId = id.parse().context("Invalid job id")?;
    let status: JobStatus = api.get(&format!("jobs/{}", id)).await?;
    println!("Job:       {}", status.job_id);
    println!("Status:    {}", status.status);
    println!("Priority:  {}", status.priority);
    println!(
        "Runner:    {}",
        status
            .runner_id
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Queued:    {}", status.queued_at);
    if let Some(started) = status.started_at {
        println!("Started:   {}", started);
    }
    if let Some(completed) = status.completed_at {
        println!("Completed: {}", completed);
    }
    Ok(())
}

pub async fn logs(api: &ApiClient, id: &str, step: Option<&str>, follow: bool) -> Result<()> {
    let id: JobId = id.parse().context("Invalid job id")?;
    let mut offset = 0usize;
    let mut stdout = std::io::stdout();

    loop {
        let mut path = format!("jobs/{}/logs?offset={}", id, offset);
        if let Some(step) = step {
            path.push_str(&format!("&step={}", step));
        }
        match api.get_optional(&path).await? {
            Some(response) => {
                let next = response
                    .headers()
                    .get("x-next-offset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                let data = response.bytes().await?;
                stdout.write_all(&data)?;
                stdout.flush()?;
                offset = next.unwrap_or(offset + data.len());
            }
            None if follow => {}
            None => anyhow::bail!("No logs for job {}", id),
        }

        if !follow {
            return Ok(());
        }
        let status: JobStatus = api.get(&format!("jobs/{}", id)).await?;
        if status.status.is_terminal() {
            return Ok(());
        }
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

pub async fn stats(api: &ApiClient) -> Result<()> {
    let stats: QueueStatistics = api.get("stats").await?;
    println!("Jobs");
    println!("  pending:   {}", stats.pending_jobs);
    println!("  running:   {}", stats.running_jobs);
    println!("  succeeded: {}", stats.completed_jobs);
    println!("  failed:    {}", stats.failed_jobs);
    println!("  canceled:  {}", stats.cancelled_jobs);
    println!("Runners");
    println!("  total:     {}", stats.total_runners);
    println!("  active:    {}", stats.active_runners);
    println!("  available: {}", stats.available_runners);
    println!("Average wait:      {:.1}s", stats.average_wait_secs);
    println!("Average execution: {:.1}s", stats.average_execution_secs);
    Ok(())
}

pub async fn pending(api: &ApiClient) -> Result<()> {
    let jobs: Vec<Job> = api.get("jobs/assignable").await?;
    if jobs.is_empty() {
        println!("No pending jobs");
        return Ok(());
    }
    for job in jobs {
        println!("{}  {}  ({} steps)", job.id, job.name, job.steps.len());
    }
    Ok(())
}

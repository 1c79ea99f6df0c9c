//! Container runtime and job server traits used by the execution engine.
//!
//! Runtimes start step containers in isolation; the job server is the
//! scheduler-side collaborator that receives logs and answers cancellation
//! polls.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{JobId, Result, StepId};

/// Everything needed to create a step container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Deterministic container name.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    /// Deterministic container name for one step of one job.
    pub fn name_for(job_id: &JobId, step_id: &StepId) -> String {
        format!("conveyor-{}-{}", job_id, step_id)
    }
}

/// Handle to a created container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime-specific identifier (e.g. container ID).
    pub id: String,
    pub name: String,
}

/// Trait for container runtimes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short runtime name used in job logs.
    fn name(&self) -> &'static str;

    /// Make sure `image` is available locally, pulling it if absent.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Start a created container.
    async fn start(&self, handle: &ContainerHandle) -> Result<()>;

    /// Follow combined stdout/stderr chunks until the container exits.
    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, Bytes>>;

    /// Wait for the container to exit and return its exit code.
    async fn wait(&self, handle: &ContainerHandle) -> Result<i64>;

    /// Ask the container to stop, killing it after `grace`.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<()>;

    /// Remove the container and its resources.
    async fn remove(&self, handle: &ContainerHandle) -> Result<()>;
}

/// Scheduler-side collaborator the execution engine reports to while running a job.
#[async_trait]
pub trait JobServer: Send + Sync {
    /// Append output for a job, optionally scoped to one step.
    async fn append_log(&self, job_id: JobId, step_id: Option<StepId>, content: Bytes)
    -> Result<()>;

    /// Whether someone asked for this job to be cancelled.
    async fn is_cancellation_requested(&self, job_id: JobId) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_generation() {
        let job_id = JobId::new();
        let step_id = StepId::new();
        let name = ContainerSpec::name_for(&job_id, &step_id);

        assert!(name.starts_with("conveyor-"));
        assert!(name.contains(&job_id.to_string()));
        assert!(name.ends_with(&step_id.to_string()));
    }

    #[test]
    fn test_container_name_unique_per_step() {
        let job_id = JobId::new();
        let a = ContainerSpec::name_for(&job_id, &StepId::new());
        let b = ContainerSpec::name_for(&job_id, &StepId::new());
        assert_ne!(a, b);
    }
}

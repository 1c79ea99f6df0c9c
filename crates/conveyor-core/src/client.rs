//! The dispatch interface between a runner process and the scheduler.

use async_trait::async_trait;

use crate::job::{Job, JobState};
use crate::runner::RunnerRegistration;
use crate::{JobId, Result, RunnerId};

/// Runner-facing scheduler operations.
///
/// Implemented in-process by the scheduler itself and remotely over HTTP; both
/// must behave the same.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Register and receive the id the registry assigned.
    async fn register_runner(&self, registration: RunnerRegistration) -> Result<RunnerId>;

    /// Refresh liveness. `Ok(false)` means the scheduler no longer knows this
    /// runner and it should register again.
    async fn heartbeat(&self, runner_id: RunnerId) -> Result<bool>;

    /// Ask for the next job this runner can execute.
    async fn request_job(&self, runner_id: RunnerId) -> Result<Option<Job>>;

    /// Report the terminal status of an assigned job.
    async fn report_result(&self, runner_id: RunnerId, job_id: JobId, status: JobState)
    -> Result<()>;

    async fn unregister_runner(&self, runner_id: RunnerId) -> Result<()>;
}

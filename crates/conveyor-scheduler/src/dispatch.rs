//! In-process implementations of the runner-facing traits.

use async_trait::async_trait;
use bytes::Bytes;
use conveyor_core::client::SchedulerClient;
use conveyor_core::job::{Job, JobState};
use conveyor_core::runner::RunnerRegistration;
use conveyor_core::runtime::JobServer;
use conveyor_core::{JobId, Result, RunnerId, StepId};

use crate::Scheduler;

#[async_trait]
impl SchedulerClient for Scheduler {
    async fn register_runner(&self, registration: RunnerRegistration) -> Result<RunnerId> {
        Ok(Scheduler::register_runner(self, registration))
    }

    async fn heartbeat(&self, runner_id: RunnerId) -> Result<bool> {
        Ok(Scheduler::heartbeat(self, runner_id))
    }

    async fn request_job(&self, runner_id: RunnerId) -> Result<Option<Job>> {
        Ok(Scheduler::request_job(self, runner_id))
    }

    async fn report_result(
        &self,
        runner_id: RunnerId,
        job_id: JobId,
        status: JobState,
    ) -> Result<()> {
        self.report_job_completion(runner_id, job_id, status);
        Ok(())
    }

    async fn unregister_runner(&self, runner_id: RunnerId) -> Result<()> {
        Scheduler::unregister_runner(self, runner_id);
        Ok(())
    }
}

#[async_trait]
impl JobServer for Scheduler {
    async fn append_log(
        &self,
        job_id: JobId,
        step_id: Option<StepId>,
        content: Bytes,
    ) -> Result<()> {
        Scheduler::append_log(self, job_id, step_id, &content)
    }

    async fn is_cancellation_requested(&self, job_id: JobId) -> Result<bool> {
        Ok(Scheduler::is_cancellation_requested(self, job_id))
    }
}

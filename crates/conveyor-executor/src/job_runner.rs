//! Drives a job through its steps.

use bytes::Bytes;
use chrono::Utc;
use conveyor_core::job::{Job, JobState};
use conveyor_core::runtime::JobServer;
use conveyor_core::{JobId, StepId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::step::{StepOutcome, StepRunner};

/// Executes a job's steps in order and decides its terminal state.
#[derive(Clone)]
pub struct JobRunner {
    steps: StepRunner,
}

impl JobRunner {
    pub fn new(steps: StepRunner) -> Self {
        Self { steps }
    }

    fn server(&self) -> &Arc<dyn JobServer> {
        self.steps.server()
    }

    /// Run `job` until it succeeds, fails or is cancelled.
    ///
    /// `shutdown` is the caller's cancellation signal; the job's own timeout is
    /// layered on top of it and whichever fires first cancels the job. Steps
    /// never reached stay `Pending`.
    pub async fn run(&self, job: &mut Job, shutdown: &CancellationToken) -> JobState {
        let job_id = job.id;
        job.status = JobState::Running;
        job.started_at = Some(Utc::now());
        info!(job_id = %job_id, name = %job.name, steps = job.steps.len(), "Job started");

        let cancel = shutdown.child_token();
        // Cancelling on drop also ends the deadline timer.
        let _deadline_guard = cancel.clone().drop_guard();
        if let Some(timeout) = job.timeout() {
            let deadline = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        info!(job_id = %job_id, timeout_secs = timeout.as_secs(), "Job deadline reached");
                        deadline.cancel();
                    }
                    _ = deadline.cancelled() => {}
                }
            });
        }

        let mut outcome = JobState::Succeeded;
        for step in job.steps.iter_mut() {
            if cancel.is_cancelled() || self.cancellation_requested(job_id).await {
                outcome = JobState::Canceled;
                break;
            }

            step.start(Utc::now());
            info!(job_id = %job_id, step = %step.name, image = %step.image, "Step started");
            self.system_log(
                job_id,
                Some(step.id),
                format!("step '{}' starting on {}", step.name, self.steps.runtime_name()),
            )
            .await;

            let result = self.steps.run(job_id, step, &cancel).await;
            let now = Utc::now();
            match result {
                Ok(StepOutcome::Exited(exit_code)) => {
                    step.finish(Some(exit_code), now);
                    if exit_code != 0 {
                        warn!(job_id = %job_id, step = %step.name, exit_code, "Step failed");
                        outcome = JobState::Failed;
                        break;
                    }
                }
                Ok(StepOutcome::Cancelled) => {
                    step.finish(None, now);
                    outcome = JobState::Canceled;
                    break;
                }
                Ok(StepOutcome::TimedOut) => {
                    step.finish(None, now);
                    self.system_log(job_id, Some(step.id), format!("step '{}' timed out", step.name))
                        .await;
                    outcome = JobState::Failed;
                    break;
                }
                Err(e) => {
                    error!(job_id = %job_id, step = %step.name, error = %e, "Step errored");
                    step.finish(None, now);
                    self.system_log(job_id, Some(step.id), format!("error: {}", e)).await;
                    outcome = JobState::Failed;
                    break;
                }
            }
        }

        job.finish(outcome, Utc::now());
        info!(job_id = %job_id, status = %outcome, "Job finished");
        outcome
    }

    async fn cancellation_requested(&self, job_id: JobId) -> bool {
        match self.server().is_cancellation_requested(job_id).await {
            Ok(requested) => requested,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Cancellation check failed");
                false
            }
        }
    }

    async fn system_log(&self, job_id: JobId, step_id: Option<StepId>, message: String) {
        let line = Bytes::from(format!("[conveyor] {}\n", message));
        if let Err(e) = self.server().append_log(job_id, step_id, line).await {
            warn!(job_id = %job_id, error = %e, "Failed to append system log line");
        }
    }
}

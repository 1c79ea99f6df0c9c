//! The scheduler: mediates between submitters, the job queue and the runner fleet.

use conveyor_config::SchedulerConfig;
use conveyor_core::job::{Job, JobState, JobStatus, Priority, QueueStatistics};
use conveyor_core::runner::{RunnerInfo, RunnerRegistration, RunnerStatus};
use conveyor_core::{Error, JobId, Result, RunnerId, StepId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::logs::LogStore;
use crate::queue::JobQueue;
use crate::registry::RunnerRegistry;

/// What one cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub evicted_runners: Vec<RunnerId>,
    /// Running jobs failed because their runner is no longer registered.
    pub failed_jobs: Vec<JobId>,
    /// Terminal jobs whose status and logs aged out.
    pub pruned_jobs: Vec<JobId>,
    /// Log entries dropped because no status exists for their job.
    pub orphaned_logs: Vec<JobId>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.evicted_runners.is_empty()
            && self.failed_jobs.is_empty()
            && self.pruned_jobs.is_empty()
            && self.orphaned_logs.is_empty()
    }
}

/// Owns no state besides its collaborators.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<JobQueue>,
    registry: Arc<RunnerRegistry>,
    logs: Arc<LogStore>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::from_parts(
            Arc::new(JobQueue::with_capacity(config.max_pending_jobs)),
            Arc::new(RunnerRegistry::new(config.active_window)),
            Arc::new(LogStore::new()),
        )
    }

    pub fn from_parts(
        queue: Arc<JobQueue>,
        registry: Arc<RunnerRegistry>,
        logs: Arc<LogStore>,
    ) -> Self {
        Self {
            queue,
            registry,
            logs,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<RunnerRegistry> {
        &self.registry
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    /// Enqueue a job, returning its id.
    pub fn submit(&self, job: Job, priority: Priority) -> Result<JobId> {
        self.queue.enqueue(job, priority)
    }

    /// Enqueue a job. Failures are logged and reported as `false`.
    pub fn schedule_build(&self, job: Job, priority: Priority) -> bool {
        let job_id = job.id;
        match self.submit(job, priority) {
            Ok(_) => true,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to schedule job");
                false
            }
        }
    }

    /// Register a runner under a freshly minted id.
    pub fn register_runner(&self, registration: RunnerRegistration) -> RunnerId {
        let runner_id = RunnerId::new();
        self.registry
            .register_runner(RunnerInfo::from_registration(runner_id, registration));
        runner_id
    }

    pub fn heartbeat(&self, runner_id: RunnerId) -> bool {
        self.registry.heartbeat(runner_id)
    }

    pub fn unregister_runner(&self, runner_id: RunnerId) -> bool {
        self.registry.unregister_runner(runner_id)
    }

    /// Hand the next matching job to a runner.
    ///
    /// Returns `None` for unknown, stale, draining or full runners and when no
    /// pending job fits the runner's capabilities.
    pub fn request_job(&self, runner_id: RunnerId) -> Option<Job> {
        let Some(runner) = self.registry.try_reserve_slot(runner_id) else {
            debug!(runner_id = %runner_id, "Runner cannot take a job");
            return None;
        };

        match self.queue.dequeue(runner_id, &runner.capabilities) {
            Some(job) => {
                self.registry.mark_busy(runner_id);
                info!(job_id = %job.id, runner_id = %runner_id, "Job assigned");
                Some(job)
            }
            None => {
                self.registry.decrement_job_count(runner_id);
                None
            }
        }
    }

    /// Record a runner's report that a job finished.
    ///
    /// Returns false when the job was not running, so repeated reports are
    /// harmless.
    pub fn report_job_completion(&self, runner_id: RunnerId, job_id: JobId, status: JobState) -> bool {
        let Some(assigned) = self.queue.complete_job(job_id, status) else {
            debug!(job_id = %job_id, runner_id = %runner_id, "Completion for a job that is not running");
            return false;
        };
        if assigned != runner_id {
            warn!(
                job_id = %job_id,
                runner_id = %runner_id,
                assigned_runner = %assigned,
                "Completion reported by a runner the job was not assigned to"
            );
        }
        if self.registry.decrement_job_count(assigned) == Some(0) {
            self.registry.mark_idle_if_unloaded(assigned);
        }
        true
    }

    pub fn cancel_job(&self, job_id: JobId) -> bool {
        self.queue.cancel_job(job_id)
    }

    /// Append output to a known job's log.
    pub fn append_log(&self, job_id: JobId, step_id: Option<StepId>, content: &[u8]) -> Result<()> {
        if self.queue.get_job_status(job_id).is_none() {
            return Err(Error::NotFound(format!("job {} not found", job_id)));
        }
        self.logs.append(job_id, step_id, content);
        Ok(())
    }

    pub fn is_cancellation_requested(&self, job_id: JobId) -> bool {
        self.queue.is_cancellation_requested(job_id)
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.queue.get_job_status(job_id)
    }

    pub fn statistics(&self) -> QueueStatistics {
        let summary = self.queue.status_summary();
        QueueStatistics {
            pending_jobs: self.queue.get_pending_count(),
            running_jobs: self.queue.get_running_count(),
            completed_jobs: summary.succeeded,
            failed_jobs: summary.failed,
            cancelled_jobs: summary.canceled,
            total_runners: self.registry.runner_count(),
            active_runners: self.registry.get_active_runners().len(),
            available_runners: self.registry.get_available_runners(&BTreeSet::new()).len(),
            average_wait_secs: summary.average_wait.as_secs_f64(),
            average_execution_secs: summary.average_execution.as_secs_f64(),
        }
    }

    /// Pending jobs in dispatch order, without dequeuing them.
    pub fn assignable_jobs(&self) -> Vec<Job> {
        self.queue
            .snapshot_pending()
            .into_iter()
            .map(|queued| queued.job)
            .collect()
    }

    pub fn active_runners(&self) -> Vec<RunnerInfo> {
        self.registry.get_active_runners()
    }

    pub fn available_runners(&self, required: &BTreeSet<String>) -> Vec<RunnerInfo> {
        self.registry.get_available_runners(required)
    }

    pub fn set_runner_status(&self, runner_id: RunnerId, status: RunnerStatus) -> bool {
        self.registry.set_runner_status(runner_id, status)
    }

    /// Evict silent runners, fail the jobs held by runners that are gone, and
    /// drop aged-out job statuses together with their logs.
    ///
    /// A runner is gone once it is evicted or unregisters while still holding
    /// work; its later reports for those jobs are ignored.
    pub fn cleanup(&self, stale_runner_age: Duration, status_retention: Duration) -> CleanupReport {
        let evicted_runners = self.registry.cleanup_stale_runners(stale_runner_age);

        let mut failed_jobs = Vec::new();
        for runner_id in self.queue.running_runner_ids() {
            if self.registry.get_runner(runner_id).is_some() {
                continue;
            }
            for job_id in self.queue.fail_jobs_for_runner(runner_id) {
                warn!(job_id = %job_id, runner_id = %runner_id, "Failed job held by departed runner");
                failed_jobs.push(job_id);
            }
        }

        let pruned_jobs = self.queue.prune_finished(status_retention);
        for job_id in &pruned_jobs {
            self.logs.remove(*job_id);
        }
        let orphaned_logs = self
            .logs
            .retain_jobs(|job_id| self.queue.get_job_status(job_id).is_some());
        if !orphaned_logs.is_empty() {
            debug!(count = orphaned_logs.len(), "Dropped logs of unknown jobs");
        }

        CleanupReport {
            evicted_runners,
            failed_jobs,
            pruned_jobs,
            orphaned_logs,
        }
    }
}

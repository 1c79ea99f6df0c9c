//! In-memory priority job queue.
//!
//! Pending jobs sit in one FIFO bucket per priority, each behind its own lock,
//! so submissions at one priority never block dispatch at another. Running
//! jobs and the per-job status projection live in sharded maps.
//!
//! Lock order is bucket, then running shard, then status shard. Every state
//! transition updates the status projection while the lock guarding the
//! job's current location is held, so the projection never disagrees with
//! where the job actually is.

use chrono::{DateTime, Utc};
use conveyor_core::job::{Job, JobState, JobStatus, Priority};
use conveyor_core::{Error, JobId, Result, RunnerId, required_capabilities};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::shard::ShardedMap;

/// A pending job with its dispatch priority.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

/// A job handed to a runner and not yet reported back.
#[derive(Debug, Clone)]
pub struct RunningJob {
    pub job: Job,
    pub runner_id: RunnerId,
    pub started_at: DateTime<Utc>,
}

/// Counts and timings derived from the retained status projections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub average_wait: Duration,
    pub average_execution: Duration,
}

/// Priority job queue.
pub struct JobQueue {
    /// Indexed by `bucket_index(priority)`.
    buckets: [Mutex<VecDeque<QueuedJob>>; 4],
    pending: AtomicUsize,
    running: ShardedMap<JobId, RunningJob>,
    statuses: ShardedMap<JobId, JobStatus>,
    max_pending: Option<usize>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// An unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// A queue holding at most `max_pending` pending jobs.
    pub fn with_capacity(max_pending: Option<usize>) -> Self {
        Self {
            buckets: Default::default(),
            pending: AtomicUsize::new(0),
            running: ShardedMap::new(),
            statuses: ShardedMap::new(),
            max_pending,
        }
    }

    fn bucket(&self, priority: Priority) -> MutexGuard<'_, VecDeque<QueuedJob>> {
        let index = match priority {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        };
        self.buckets[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job at the tail of its priority bucket.
    pub fn enqueue(&self, mut job: Job, priority: Priority) -> Result<JobId> {
        job.validate()?;
        self.reserve_pending()?;

        let now = Utc::now();
        let job_id = job.id;
        job.status = JobState::Pending;
        job.started_at = None;
        job.finished_at = None;
        job.cancellation_requested = false;

        let mut bucket = self.bucket(priority);
        let fresh = self.statuses.insert_if_absent(
            job_id,
            JobStatus {
                job_id,
                status: JobState::Pending,
                runner_id: None,
                priority,
                queued_at: now,
                started_at: None,
                completed_at: None,
            },
        );
        if !fresh {
            drop(bucket);
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Conflict(format!("job {} already submitted", job_id)));
        }
        bucket.push_back(QueuedJob {
            job,
            priority,
            enqueued_at: now,
        });
        drop(bucket);

        info!(job_id = %job_id, %priority, "Job enqueued");
        Ok(job_id)
    }

    fn reserve_pending(&self) -> Result<()> {
        let Some(max) = self.max_pending else {
            self.pending.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < max).then_some(count + 1)
            })
            .map(|_| ())
            .map_err(|count| Error::QueueFull(format!("{} jobs pending", count)))
    }

    /// Hand the highest-priority job `capabilities` can run to `runner_id`.
    ///
    /// Each bucket is offered its head job only. A head the runner cannot run
    /// moves to the tail of its bucket and the scan continues one priority
    /// lower, so one unservable job never starves its whole level.
    pub fn dequeue(&self, runner_id: RunnerId, capabilities: &BTreeSet<String>) -> Option<Job> {
        for priority in Priority::DESCENDING {
            let mut bucket = self.bucket(priority);
            let Some(mut candidate) = bucket.pop_front() else {
                continue;
            };

            let required = required_capabilities(&candidate.job);
            if !required.is_subset(capabilities) {
                debug!(
                    job_id = %candidate.job.id,
                    runner_id = %runner_id,
                    missing = ?required.difference(capabilities).collect::<Vec<_>>(),
                    "Runner lacks capabilities, requeueing job"
                );
                bucket.push_back(candidate);
                continue;
            }

            let now = Utc::now();
            let job_id = candidate.job.id;
            candidate.job.status = JobState::Running;
            candidate.job.started_at = Some(now);
            self.pending.fetch_sub(1, Ordering::SeqCst);

            self.running.insert(
                job_id,
                RunningJob {
                    job: candidate.job.clone(),
                    runner_id,
                    started_at: now,
                },
            );
            self.statuses.with_mut(&job_id, |status| {
                status.status = JobState::Running;
                status.runner_id = Some(runner_id);
                status.started_at = Some(now);
            });
            drop(bucket);

            info!(job_id = %job_id, runner_id = %runner_id, %priority, "Job dequeued");
            return Some(candidate.job);
        }
        None
    }

    /// Record the terminal status of a running job.
    ///
    /// Returns the runner the job was assigned to, or `None` when the job was
    /// not running (already completed or unknown), in which case nothing changes.
    /// A job cancelled while running stays `Canceled` whatever the runner reports.
    pub fn complete_job(&self, job_id: JobId, status: JobState) -> Option<RunnerId> {
        if !status.is_terminal() {
            debug!(job_id = %job_id, %status, "Ignoring non-terminal completion");
            return None;
        }

        let (running, final_status) = self.running.remove_with(&job_id, |running| {
            let now = Utc::now();
            let final_status = if running.job.cancellation_requested {
                JobState::Canceled
            } else {
                status
            };
            self.statuses.with_mut(&job_id, |projection| {
                projection.status = final_status;
                projection.completed_at = Some(now);
            });
            final_status
        })?;

        info!(job_id = %job_id, runner_id = %running.runner_id, status = %final_status, "Job completed");
        Some(running.runner_id)
    }

    /// Cancel a job.
    ///
    /// Pending jobs leave the queue immediately. Running jobs are flagged and
    /// stay running until their runner notices and reports back. Returns false
    /// for unknown or already finished (but not cancelled) jobs.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let Some((priority, state)) = self.statuses.with(&job_id, |s| (s.priority, s.status))
        else {
            return false;
        };

        if state == JobState::Pending {
            let mut bucket = self.bucket(priority);
            if let Some(position) = bucket.iter().position(|q| q.job.id == job_id) {
                bucket.remove(position);
                self.pending.fetch_sub(1, Ordering::SeqCst);
                let now = Utc::now();
                self.statuses.with_mut(&job_id, |status| {
                    status.status = JobState::Canceled;
                    status.completed_at = Some(now);
                });
                drop(bucket);
                info!(job_id = %job_id, "Pending job cancelled");
                return true;
            }
            // Dequeued since we looked; fall through to the running case.
        }

        let flagged = self.running.with_mut(&job_id, |running| {
            running.job.cancellation_requested = true;
            running.job.status = JobState::Canceled;
            self.statuses.with_mut(&job_id, |status| {
                status.status = JobState::Canceled;
            });
        });
        if flagged.is_some() {
            info!(job_id = %job_id, "Cancellation requested for running job");
            return true;
        }

        self.statuses
            .with(&job_id, |s| s.status == JobState::Canceled)
            .unwrap_or(false)
    }

    /// Whether a cancellation has been requested for this job.
    pub fn is_cancellation_requested(&self, job_id: JobId) -> bool {
        if let Some(flag) = self.running.with(&job_id, |r| r.job.cancellation_requested) {
            return flag;
        }
        self.statuses
            .with(&job_id, |s| s.status == JobState::Canceled)
            .unwrap_or(false)
    }

    pub fn get_pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn get_running_count(&self) -> usize {
        self.running.len()
    }

    pub fn get_job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.statuses.with(&job_id, Clone::clone)
    }

    pub fn get_running_job(&self, job_id: JobId) -> Option<RunningJob> {
        self.running.with(&job_id, Clone::clone)
    }

    /// Pending jobs in the order `dequeue` would consider them, without removing any.
    pub fn snapshot_pending(&self) -> Vec<QueuedJob> {
        Priority::DESCENDING
            .iter()
            .flat_map(|priority| self.bucket(*priority).iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Runners that currently hold at least one running job.
    pub fn running_runner_ids(&self) -> BTreeSet<RunnerId> {
        self.running
            .collect(|_, running| Some(running.runner_id))
            .into_iter()
            .collect()
    }

    /// Fail every job still running on `runner_id`. Returns the affected job ids.
    pub fn fail_jobs_for_runner(&self, runner_id: RunnerId) -> Vec<JobId> {
        let orphaned = self
            .running
            .collect(|id, running| (running.runner_id == runner_id).then_some(*id));
        orphaned
            .into_iter()
            .filter(|job_id| self.complete_job(*job_id, JobState::Failed).is_some())
            .collect()
    }

    /// Drop terminal status projections completed more than `retention` ago.
    pub fn prune_finished(&self, retention: Duration) -> Vec<JobId> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Vec::new();
        };
        self.statuses.retain(|_, status| {
            !(status.status.is_terminal()
                && status.completed_at.is_some_and(|at| at <= cutoff))
        })
    }

    /// Outcome counts and mean timings over the retained projections.
    pub fn status_summary(&self) -> StatusSummary {
        let statuses = self.statuses.collect(|_, status| Some(status.clone()));
        let mut summary = StatusSummary::default();
        let mut waits = Vec::new();
        let mut executions = Vec::new();

        for status in &statuses {
            match status.status {
                JobState::Succeeded => summary.succeeded += 1,
                JobState::Failed => summary.failed += 1,
                JobState::Canceled => summary.canceled += 1,
                JobState::Pending | JobState::Running => {}
            }
            if let Some(started) = status.started_at {
                waits.push(started - status.queued_at);
                if let Some(completed) = status.completed_at {
                    executions.push(completed - started);
                }
            }
        }

        summary.average_wait = mean(&waits);
        summary.average_execution = mean(&executions);
        summary
    }
}

fn mean(samples: &[chrono::Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: chrono::Duration = samples.iter().copied().sum();
    (total / samples.len() as i32).to_std().unwrap_or_default()
}

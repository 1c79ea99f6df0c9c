//! Jobs, steps and the status projections shared by the scheduler and runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{Error, JobId, Result, RunnerId, StepId};

/// Dispatch priority. Totally ordered: `Critical > High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All priorities, highest first. This is the dequeue scan order.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(Error::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::Failed | StepState::Skipped
        )
    }

    /// Step states only move forward; terminal states are final.
    pub fn can_transition_to(&self, next: StepState) -> bool {
        match (self, next) {
            (StepState::Pending, StepState::Running | StepState::Skipped) => true,
            (StepState::Running, StepState::Succeeded | StepState::Failed) => true,
            _ => false,
        }
    }
}

/// Definition of a step as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name, unique within the job by convention.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Shell commands, run in order under `/bin/sh -c`.
    pub commands: Vec<String>,
    /// Working directory inside the container.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Definition of a job as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    /// Repository this job builds, if any.
    #[serde(default)]
    pub repository: Option<String>,
    pub steps: Vec<StepSpec>,
    /// Total job timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One container execution within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub image: String,
    pub commands: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub status: StepState,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn from_spec(spec: StepSpec) -> Self {
        Self {
            id: StepId::new(),
            name: spec.name,
            image: spec.image,
            commands: spec.commands,
            working_dir: spec.working_dir,
            env: spec.env,
            timeout_secs: spec.timeout_secs,
            status: StepState::Pending,
            exit_code: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// The commands joined into a single shell script.
    pub fn script(&self) -> String {
        self.commands.join(" && ")
    }

    /// The container command line for this step.
    pub fn command(&self) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), self.script()]
    }

    /// Move the step to `Running`. Returns false if the step already left `Pending`.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(StepState::Running) {
            return false;
        }
        self.status = StepState::Running;
        self.started_at = Some(now);
        true
    }

    /// Record the container exit. Zero exit means `Succeeded`, anything else `Failed`.
    pub fn finish(&mut self, exit_code: Option<i64>, now: DateTime<Utc>) -> bool {
        let next = if exit_code == Some(0) {
            StepState::Succeeded
        } else {
            StepState::Failed
        };
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.exit_code = exit_code;
        self.finished_at = Some(now);
        true
    }
}

/// A unit of work: an ordered list of container steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub repository: Option<String>,
    pub steps: Vec<Step>,
    pub status: JobState,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cancellation_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job from a submitted spec, minting job and step ids.
    pub fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: JobId::new(),
            name: spec.name,
            repository: spec.repository,
            steps: spec.steps.into_iter().map(Step::from_spec).collect(),
            status: JobState::Pending,
            timeout_secs: spec.timeout_secs,
            cancellation_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_running_step(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepState::Running)
    }

    /// Reject jobs that cannot be executed.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("job name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(Error::InvalidInput(format!(
                "job '{}' has no steps",
                self.name
            )));
        }
        for step in &self.steps {
            if step.image.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "step '{}' has no image",
                    step.name
                )));
            }
            if step.commands.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "step '{}' has no commands",
                    step.name
                )));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::InvalidInput("job timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Move the job into a terminal state.
    ///
    /// Refused while any step is still running, and once the job is terminal.
    pub fn finish(&mut self, state: JobState, now: DateTime<Utc>) -> bool {
        if !state.is_terminal() || self.is_terminal() || self.has_running_step() {
            return false;
        }
        self.status = state;
        self.finished_at = Some(now);
        true
    }
}

/// Read-only projection of a job's position in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub status: JobState,
    pub runner_id: Option<RunnerId>,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregated queue and fleet counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub total_runners: usize,
    pub active_runners: usize,
    pub available_runners: usize,
    /// Mean time between enqueue and start, over retained jobs.
    pub average_wait_secs: f64,
    /// Mean time between start and completion, over retained jobs.
    pub average_execution_secs: f64,
}

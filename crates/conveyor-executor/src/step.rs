//! Runs a single step as a container.

use conveyor_config::RunnerConfig;
use conveyor_core::job::Step;
use conveyor_core::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, JobServer};
use conveyor_core::{JobId, Result, StepId};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to let buffered output drain after the container exits.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a step's container ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The container exited on its own with this code.
    Exited(i64),
    /// The job was cancelled or hit its deadline; the container was stopped.
    Cancelled,
    /// The step exceeded its own timeout; the container was stopped.
    TimedOut,
}

/// Drives one step container from image pull to removal.
#[derive(Clone)]
pub struct StepRunner {
    runtime: Arc<dyn ContainerRuntime>,
    server: Arc<dyn JobServer>,
    cancel_poll_interval: Duration,
    stop_grace: Duration,
}

impl StepRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        server: Arc<dyn JobServer>,
        cancel_poll_interval: Duration,
        stop_grace: Duration,
    ) -> Self {
        Self {
            runtime,
            server,
            cancel_poll_interval,
            stop_grace,
        }
    }

    pub fn from_config(
        runtime: Arc<dyn ContainerRuntime>,
        server: Arc<dyn JobServer>,
        config: &RunnerConfig,
    ) -> Self {
        Self::new(runtime, server, config.cancel_poll_interval, config.stop_grace)
    }

    pub fn server(&self) -> &Arc<dyn JobServer> {
        &self.server
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Run `step` of job `job_id` to completion, cancellation or timeout.
    ///
    /// The container is always removed afterwards. Runtime failures are
    /// returned as errors.
    pub async fn run(
        &self,
        job_id: JobId,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        self.runtime.ensure_image(&step.image).await?;

        let spec = container_spec(job_id, step);
        let handle = self.runtime.create(&spec).await?;
        let outcome = self.drive(job_id, step, &handle, cancel).await;

        if let Err(e) = self.runtime.remove(&handle).await {
            warn!(container = %handle.name, error = %e, "Failed to remove container");
        }
        outcome
    }

    async fn drive(
        &self,
        job_id: JobId,
        step: &Step,
        handle: &ContainerHandle,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        self.runtime.start(handle).await?;
        let log_task = self.forward_logs(job_id, step.id, handle).await?;

        let step_deadline = async {
            match step.timeout() {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            exit = self.runtime.wait(handle) => {
                let exit_code = exit?;
                // Let buffered output reach the log sink.
                drain(log_task).await;
                info!(job_id = %job_id, step = %step.name, exit_code, "Step container exited");
                return Ok(StepOutcome::Exited(exit_code));
            }
            _ = cancel.cancelled() => StepOutcome::Cancelled,
            _ = self.watch_cancellation(job_id) => StepOutcome::Cancelled,
            _ = step_deadline => StepOutcome::TimedOut,
        };

        info!(job_id = %job_id, step = %step.name, ?outcome, "Stopping step container");
        if let Err(e) = self.runtime.stop(handle, self.stop_grace).await {
            warn!(container = %handle.name, error = %e, "Failed to stop container");
        }
        log_task.abort();
        Ok(outcome)
    }

    /// Stream container output to the job server, tagged with the step id.
    async fn forward_logs(
        &self,
        job_id: JobId,
        step_id: StepId,
        handle: &ContainerHandle,
    ) -> Result<JoinHandle<()>> {
        let mut logs = self.runtime.logs(handle).await?;
        let server = Arc::clone(&self.server);
        Ok(tokio::spawn(async move {
            while let Some(chunk) = logs.next().await {
                if let Err(e) = server.append_log(job_id, Some(step_id), chunk).await {
                    warn!(job_id = %job_id, error = %e, "Failed to append log");
                }
            }
        }))
    }

    /// Resolves once the job server reports a cancellation request.
    async fn watch_cancellation(&self, job_id: JobId) {
        let mut ticker = tokio::time::interval(self.cancel_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.server.is_cancellation_requested(job_id).await {
                Ok(true) => {
                    info!(job_id = %job_id, "Cancellation requested");
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!(job_id = %job_id, error = %e, "Cancellation poll failed"),
            }
        }
    }
}

async fn drain(log_task: JoinHandle<()>) {
    let abort = log_task.abort_handle();
    if tokio::time::timeout(LOG_DRAIN_TIMEOUT, log_task).await.is_err() {
        abort.abort();
    }
}

fn container_spec(job_id: JobId, step: &Step) -> ContainerSpec {
    ContainerSpec {
        name: ContainerSpec::name_for(&job_id, &step.id),
        image: step.image.clone(),
        command: step.command(),
        working_dir: step.working_dir.clone(),
        env: step.env.clone(),
        labels: HashMap::from([
            ("conveyor.job-id".to_string(), job_id.to_string()),
            ("conveyor.step-id".to_string(), step.id.to_string()),
            ("conveyor.step-name".to_string(), step.name.clone()),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedRuntime;
    use conveyor_config::SchedulerConfig;
    use conveyor_core::job::{Job, JobSpec, Priority, StepSpec};
    use conveyor_scheduler::Scheduler;
    use std::time::Instant;

    fn step(script: &str, timeout_secs: Option<u64>) -> Step {
        Step::from_spec(StepSpec {
            name: "test".to_string(),
            image: "alpine".to_string(),
            commands: vec![script.to_string()],
            timeout_secs,
            ..Default::default()
        })
    }

    fn runner(runtime: Arc<ScriptedRuntime>, scheduler: &Scheduler) -> StepRunner {
        StepRunner::new(
            runtime,
            Arc::new(scheduler.clone()),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_step_output_reaches_log_sink() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        let runtime = Arc::new(ScriptedRuntime::default());
        let runner = runner(runtime.clone(), &scheduler);
        let job = Job::from_spec(JobSpec {
            name: "echo".to_string(),
            steps: vec![StepSpec {
                name: "test".to_string(),
                image: "alpine".to_string(),
                commands: vec!["echo hi && echo there".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        });
        let (job_id, step) = (job.id, job.steps[0].clone());
        assert!(scheduler.schedule_build(job, Priority::Normal));

        let outcome = runner
            .run(job_id, &step, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Exited(0));
        let logs = scheduler.logs().read(job_id, Some(step.id), 0, None).unwrap();
        assert_eq!(&logs.data[..], b"hi\nthere\n");
        assert!(runtime.events().iter().any(|e| e.starts_with("remove ")));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        let runner = runner(Arc::new(ScriptedRuntime::default()), &scheduler);
        let outcome = runner
            .run(JobId::new(), &step("exit 3", None), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Exited(3));
    }

    #[tokio::test]
    async fn test_step_timeout_stops_container() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        let runtime = Arc::new(ScriptedRuntime::default());
        let runner = runner(runtime.clone(), &scheduler);

        let started = Instant::now();
        let outcome = runner
            .run(JobId::new(), &step("sleep 10", Some(1)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
        let events = runtime.events();
        assert!(events.iter().any(|e| e.starts_with("stop ")));
        assert!(events.iter().any(|e| e.starts_with("remove ")));
    }

    #[tokio::test]
    async fn test_token_cancellation() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        let runner = runner(Arc::new(ScriptedRuntime::default()), &scheduler);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = runner
            .run(JobId::new(), &step("sleep 10", None), &token)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_pull_failure_is_an_error_and_creates_nothing() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        let runtime = Arc::new(ScriptedRuntime::with_broken_image("alpine"));
        let runner = runner(runtime.clone(), &scheduler);

        let result = runner
            .run(JobId::new(), &step("echo hi", None), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(runtime.events(), vec!["pull alpine".to_string()]);
    }
}

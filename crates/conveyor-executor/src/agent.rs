//! The runner agent: registers with the scheduler, keeps the registration
//! alive, and pulls and executes jobs.

use conveyor_config::RunnerConfig;
use conveyor_core::client::SchedulerClient;
use conveyor_core::job::{Job, JobState};
use conveyor_core::runner::RunnerRegistration;
use conveyor_core::{Error, JobId, Result, RunnerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job_runner::JobRunner;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const REPORT_ATTEMPTS: usize = 5;

/// A runner process's connection to the scheduler.
pub struct RunnerAgent {
    config: RunnerConfig,
    client: Arc<dyn SchedulerClient>,
    jobs: JobRunner,
}

impl RunnerAgent {
    pub fn new(config: RunnerConfig, client: Arc<dyn SchedulerClient>, jobs: JobRunner) -> Self {
        Self {
            config,
            client,
            jobs,
        }
    }

    pub fn registration(&self) -> RunnerRegistration {
        RunnerRegistration {
            name: self.config.name.clone(),
            capabilities: self.config.capabilities.clone(),
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            version: self.config.version.clone(),
            platform: self.config.platform.clone(),
            labels: self.config.labels.clone(),
        }
    }

    /// Register, then heartbeat and poll for jobs until `shutdown` fires.
    ///
    /// Runs one poll loop per job slot. On shutdown, running jobs are cancelled
    /// and reported, and the runner unregisters.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let runner_id = self.register(&shutdown).await?;
        let (id_tx, id_rx) = watch::channel(runner_id);

        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&self).heartbeat_loop(id_tx, shutdown.clone()));
        for slot in 0..self.config.max_concurrent_jobs.max(1) {
            tasks.spawn(Arc::clone(&self).poll_loop(slot, id_rx.clone(), shutdown.clone()));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Runner task panicked");
            }
        }

        let runner_id = *id_rx.borrow();
        match self.client.unregister_runner(runner_id).await {
            Ok(()) => info!(runner_id = %runner_id, "Runner unregistered"),
            Err(e) => warn!(runner_id = %runner_id, error = %e, "Failed to unregister runner"),
        }
        Ok(())
    }

    /// Register with exponential back-off. Fails only when shut down first.
    async fn register(&self, shutdown: &CancellationToken) -> Result<RunnerId> {
        let mut backoff = self.config.poll_interval;
        loop {
            match self.client.register_runner(self.registration()).await {
                Ok(runner_id) => {
                    info!(runner_id = %runner_id, name = %self.config.name, "Registered with scheduler");
                    return Ok(runner_id);
                }
                Err(e) => warn!(error = %e, retry_in = ?backoff, "Registration failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                _ = sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn heartbeat_loop(
        self: Arc<Self>,
        id_tx: watch::Sender<RunnerId>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; registration just happened.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let runner_id = *id_tx.borrow();
            match self.client.heartbeat(runner_id).await {
                Ok(true) => debug!(runner_id = %runner_id, "Heartbeat sent"),
                Ok(false) => {
                    warn!(runner_id = %runner_id, "Scheduler lost our registration, re-registering");
                    match self.register(&shutdown).await {
                        Ok(new_id) => {
                            id_tx.send_replace(new_id);
                        }
                        Err(_) => break,
                    }
                }
                Err(e) => warn!(runner_id = %runner_id, error = %e, "Heartbeat failed"),
            }
        }
    }

    async fn poll_loop(
        self: Arc<Self>,
        slot: usize,
        id_rx: watch::Receiver<RunnerId>,
        shutdown: CancellationToken,
    ) {
        info!(slot, "Starting job poll loop");
        let error_backoff = (self.config.poll_interval * 5).min(MAX_BACKOFF);

        while !shutdown.is_cancelled() {
            let runner_id = *id_rx.borrow();
            let delay = match self.client.request_job(runner_id).await {
                Ok(Some(job)) => {
                    self.execute(runner_id, job, &shutdown).await;
                    continue;
                }
                Ok(None) => self.config.poll_interval,
                Err(e) => {
                    warn!(runner_id = %runner_id, error = %e, "Failed to request job");
                    error_backoff
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        info!(slot, "Job poll loop stopped");
    }

    async fn execute(&self, runner_id: RunnerId, mut job: Job, shutdown: &CancellationToken) {
        info!(job_id = %job.id, runner_id = %runner_id, name = %job.name, "Claimed job");
        let status = self.jobs.run(&mut job, shutdown).await;
        self.report(runner_id, job.id, status).await;
    }

    /// Report a result, retrying transport failures with back-off.
    async fn report(&self, runner_id: RunnerId, job_id: JobId, status: JobState) {
        let mut backoff = Duration::from_secs(1);
        for attempt in 1..=REPORT_ATTEMPTS {
            match self.client.report_result(runner_id, job_id, status).await {
                Ok(()) => {
                    debug!(job_id = %job_id, %status, "Reported job result");
                    return;
                }
                Err(e) if attempt < REPORT_ATTEMPTS => {
                    warn!(job_id = %job_id, attempt, error = %e, "Failed to report job result, retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Giving up reporting job result");
                }
            }
        }
    }
}

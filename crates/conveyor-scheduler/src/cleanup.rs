//! Periodic eviction of silent runners and expired job records.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Scheduler;

/// Background task running `Scheduler::cleanup` on a fixed interval.
pub struct CleanupLoop {
    scheduler: Scheduler,
    interval: Duration,
    stale_runner_age: Duration,
    status_retention: Duration,
}

impl CleanupLoop {
    pub fn new(
        scheduler: Scheduler,
        interval: Duration,
        stale_runner_age: Duration,
        status_retention: Duration,
    ) -> Self {
        Self {
            scheduler,
            interval,
            stale_runner_age,
            status_retention,
        }
    }

    pub fn from_config(scheduler: Scheduler, config: &conveyor_config::SchedulerConfig) -> Self {
        Self::new(
            scheduler,
            config.cleanup_interval,
            config.stale_runner_age,
            config.status_retention,
        )
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval = ?self.interval, max_age = ?self.stale_runner_age, "Cleanup loop started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.scheduler.cleanup(self.stale_runner_age, self.status_retention);
                    if report.is_empty() {
                        debug!("Cleanup pass found nothing to do");
                    } else {
                        info!(
                            evicted_runners = report.evicted_runners.len(),
                            failed_jobs = report.failed_jobs.len(),
                            pruned_jobs = report.pruned_jobs.len(),
                            orphaned_logs = report.orphaned_logs.len(),
                            "Cleanup pass finished"
                        );
                    }
                }
            }
        }
        info!("Cleanup loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_config::SchedulerConfig;
    use conveyor_core::runner::RunnerRegistration;

    #[tokio::test]
    async fn test_loop_evicts_and_stops() {
        let scheduler = Scheduler::new(&SchedulerConfig::default());
        let runner = scheduler.register_runner(RunnerRegistration {
            name: "silent".to_string(),
            max_concurrent_jobs: 1,
            ..Default::default()
        });
        scheduler
            .registry()
            .backdate_heartbeat(runner, Duration::from_secs(60));

        let shutdown = CancellationToken::new();
        let cleanup = CleanupLoop::new(
            scheduler.clone(),
            Duration::from_millis(20),
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );
        let handle = tokio::spawn(cleanup.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.registry().get_runner(runner).is_none());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

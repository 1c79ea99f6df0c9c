//! Registry of runners: identity, capabilities, capacity and liveness.

use chrono::Utc;
use conveyor_core::RunnerId;
use conveyor_core::runner::{RunnerInfo, RunnerStatus};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::shard::ShardedMap;

/// Default freshness window for a runner to count as active.
pub const DEFAULT_ACTIVE_WINDOW: Duration = Duration::from_secs(120);

/// Tracks the runner fleet. Each runner's record, including its job counter,
/// lives behind the lock of its shard only.
pub struct RunnerRegistry {
    runners: ShardedMap<RunnerId, RunnerInfo>,
    active_window: Duration,
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVE_WINDOW)
    }
}

impl RunnerRegistry {
    pub fn new(active_window: Duration) -> Self {
        Self {
            runners: ShardedMap::new(),
            active_window,
        }
    }

    /// Store a runner under its id with a zeroed job counter.
    pub fn register_runner(&self, mut info: RunnerInfo) {
        info.current_jobs = 0;
        let runner_id = info.id;
        let name = info.name.clone();
        if self.runners.insert(runner_id, info).is_some() {
            warn!(runner_id = %runner_id, "Runner re-registered under an existing id");
        }
        info!(runner_id = %runner_id, name = %name, "Runner registered");
    }

    /// Refresh a runner's heartbeat. Returns false if the runner is unknown.
    pub fn heartbeat(&self, runner_id: RunnerId) -> bool {
        let now = Utc::now();
        let known = self
            .runners
            .with_mut(&runner_id, |runner| {
                // Concurrent heartbeats race benignly; keep the latest timestamp.
                if now > runner.last_heartbeat {
                    runner.last_heartbeat = now;
                }
            })
            .is_some();
        if !known {
            debug!(runner_id = %runner_id, "Heartbeat from unknown runner");
        }
        known
    }

    pub fn unregister_runner(&self, runner_id: RunnerId) -> bool {
        let removed = self.runners.remove(&runner_id).is_some();
        if removed {
            info!(runner_id = %runner_id, "Runner unregistered");
        }
        removed
    }

    pub fn get_runner(&self, runner_id: RunnerId) -> Option<RunnerInfo> {
        self.runners.with(&runner_id, Clone::clone)
    }

    fn is_active(&self, runner: &RunnerInfo) -> bool {
        runner.status != RunnerStatus::Offline && self.is_fresh(runner)
    }

    fn is_fresh(&self, runner: &RunnerInfo) -> bool {
        let age = Utc::now() - runner.last_heartbeat;
        age.to_std().map(|age| age <= self.active_window).unwrap_or(true)
    }

    /// The runner, if it is currently active.
    pub fn get_active_runner(&self, runner_id: RunnerId) -> Option<RunnerInfo> {
        self.runners
            .with(&runner_id, |runner| self.is_active(runner).then(|| runner.clone()))
            .flatten()
    }

    /// Runners with a recent heartbeat that are not offline.
    pub fn get_active_runners(&self) -> Vec<RunnerInfo> {
        self.runners
            .collect(|_, runner| self.is_active(runner).then(|| runner.clone()))
    }

    /// Active runners that accept work, offer every capability in `required`
    /// and have spare capacity.
    pub fn get_available_runners(&self, required: &BTreeSet<String>) -> Vec<RunnerInfo> {
        self.runners.collect(|_, runner| {
            (self.is_active(runner)
                && runner.status.accepts_work()
                && runner.has_spare_capacity()
                && runner.has_capabilities(required))
            .then(|| runner.clone())
        })
    }

    /// Set a runner's status. Moving to `Idle` also resets its job counter.
    pub fn set_runner_status(&self, runner_id: RunnerId, status: RunnerStatus) -> bool {
        self.runners
            .with_mut(&runner_id, |runner| {
                if runner.status != status {
                    debug!(runner_id = %runner_id, from = ?runner.status, to = ?status, "Runner status changed");
                }
                runner.status = status;
                if status == RunnerStatus::Idle {
                    runner.current_jobs = 0;
                }
            })
            .is_some()
    }

    /// Reserve one job slot on an active runner that accepts work.
    ///
    /// Returns the runner record (with the slot counted) on success. Fails for
    /// unknown, stale, offline, draining or full runners.
    pub fn try_reserve_slot(&self, runner_id: RunnerId) -> Option<RunnerInfo> {
        self.runners
            .with_mut(&runner_id, |runner| {
                if !self.is_active(runner)
                    || !runner.status.accepts_work()
                    || !runner.has_spare_capacity()
                {
                    return None;
                }
                runner.current_jobs += 1;
                Some(runner.clone())
            })
            .flatten()
    }

    /// Count one more job against a runner. Refused at capacity.
    pub fn increment_job_count(&self, runner_id: RunnerId) -> bool {
        self.runners
            .with_mut(&runner_id, |runner| {
                if !runner.has_spare_capacity() {
                    return false;
                }
                runner.current_jobs += 1;
                true
            })
            .unwrap_or(false)
    }

    /// Count one job less against a runner, flooring at zero. Returns the new
    /// count, or `None` for unknown runners.
    pub fn decrement_job_count(&self, runner_id: RunnerId) -> Option<usize> {
        self.runners.with_mut(&runner_id, |runner| {
            runner.current_jobs = runner.current_jobs.saturating_sub(1);
            runner.current_jobs
        })
    }

    pub fn get_job_count(&self, runner_id: RunnerId) -> Option<usize> {
        self.runners.with(&runner_id, |runner| runner.current_jobs)
    }

    /// Move an `Idle` runner to `Busy`. Other statuses are left alone.
    pub fn mark_busy(&self, runner_id: RunnerId) {
        self.transition(runner_id, RunnerStatus::Idle, RunnerStatus::Busy);
    }

    /// Move a `Busy` runner with no assigned jobs back to `Idle`.
    pub fn mark_idle_if_unloaded(&self, runner_id: RunnerId) {
        self.runners.with_mut(&runner_id, |runner| {
            if runner.status == RunnerStatus::Busy && runner.current_jobs == 0 {
                runner.status = RunnerStatus::Idle;
            }
        });
    }

    fn transition(&self, runner_id: RunnerId, from: RunnerStatus, to: RunnerStatus) {
        self.runners.with_mut(&runner_id, |runner| {
            if runner.status == from {
                runner.status = to;
            }
        });
    }

    /// Remove every runner whose last heartbeat is older than `max_age`.
    pub fn cleanup_stale_runners(&self, max_age: Duration) -> Vec<RunnerId> {
        let now = Utc::now();
        let evicted = self.runners.retain(|_, runner| {
            (now - runner.last_heartbeat)
                .to_std()
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
        for runner_id in &evicted {
            info!(runner_id = %runner_id, "Evicted stale runner");
        }
        evicted
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&self, runner_id: RunnerId, by: Duration) {
        self.runners.with_mut(&runner_id, |runner| {
            runner.last_heartbeat = runner.last_heartbeat - chrono::Duration::from_std(by).unwrap();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::runner::RunnerRegistration;
    use std::sync::Arc;

    fn make_runner(caps: &[&str], max: usize) -> RunnerInfo {
        RunnerInfo::from_registration(
            RunnerId::new(),
            RunnerRegistration {
                name: "runner".to_string(),
                capabilities: caps.iter().map(|s| s.to_string()).collect(),
                max_concurrent_jobs: max,
                ..Default::default()
            },
        )
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&["docker"], 2);
        let id = runner.id;
        registry.register_runner(runner);

        let stored = registry.get_runner(id).unwrap();
        assert_eq!(stored.current_jobs, 0);
        assert_eq!(registry.get_active_runners().len(), 1);
        assert_eq!(registry.runner_count(), 1);
    }

    #[test]
    fn test_heartbeat_unknown_runner_is_noop() {
        let registry = RunnerRegistry::default();
        assert!(!registry.heartbeat(RunnerId::new()));
        assert_eq!(registry.runner_count(), 0);
    }

    #[test]
    fn test_heartbeat_refreshes_timestamp() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&[], 1);
        let id = runner.id;
        registry.register_runner(runner);
        registry.backdate_heartbeat(id, Duration::from_secs(600));
        assert!(registry.get_active_runner(id).is_none());

        assert!(registry.heartbeat(id));
        assert!(registry.get_active_runner(id).is_some());
    }

    #[test]
    fn test_active_excludes_offline_and_stale() {
        let registry = RunnerRegistry::default();
        let offline = make_runner(&[], 1);
        let stale = make_runner(&[], 1);
        let fresh = make_runner(&[], 1);
        let (offline_id, stale_id, fresh_id) = (offline.id, stale.id, fresh.id);
        registry.register_runner(offline);
        registry.register_runner(stale);
        registry.register_runner(fresh);

        registry.set_runner_status(offline_id, RunnerStatus::Offline);
        registry.backdate_heartbeat(stale_id, Duration::from_secs(121));

        let active: Vec<RunnerId> = registry.get_active_runners().iter().map(|r| r.id).collect();
        assert_eq!(active, vec![fresh_id]);
    }

    #[test]
    fn test_available_runners_filtering() {
        let registry = RunnerRegistry::default();
        let gpu = make_runner(&["container-runtime", "gpu"], 1);
        let plain = make_runner(&["container-runtime"], 1);
        let draining = make_runner(&["container-runtime", "gpu"], 4);
        let (gpu_id, plain_id, draining_id) = (gpu.id, plain.id, draining.id);
        registry.register_runner(gpu);
        registry.register_runner(plain);
        registry.register_runner(draining);
        registry.set_runner_status(draining_id, RunnerStatus::Draining);

        let needs_gpu = set(&["container-runtime", "gpu"]);
        let ids: Vec<RunnerId> = registry
            .get_available_runners(&needs_gpu)
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![gpu_id]);

        // A full runner is not available.
        assert!(registry.increment_job_count(gpu_id));
        assert!(registry.get_available_runners(&needs_gpu).is_empty());
        assert_eq!(
            registry.get_available_runners(&set(&["container-runtime"])).len(),
            1
        );
        assert_eq!(
            registry.get_available_runners(&set(&["container-runtime"]))[0].id,
            plain_id
        );
    }

    #[test]
    fn test_idle_resets_job_count() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&[], 3);
        let id = runner.id;
        registry.register_runner(runner);
        registry.increment_job_count(id);
        registry.increment_job_count(id);
        registry.set_runner_status(id, RunnerStatus::Busy);
        assert_eq!(registry.get_job_count(id), Some(2));

        registry.set_runner_status(id, RunnerStatus::Idle);
        assert_eq!(registry.get_job_count(id), Some(0));
    }

    #[test]
    fn test_job_count_bounds() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&[], 1);
        let id = runner.id;
        registry.register_runner(runner);

        assert_eq!(registry.decrement_job_count(id), Some(0));
        assert!(registry.increment_job_count(id));
        assert!(!registry.increment_job_count(id));
        assert_eq!(registry.get_job_count(id), Some(1));
        assert_eq!(registry.decrement_job_count(RunnerId::new()), None);
    }

    #[test]
    fn test_reserve_slot_refuses_draining() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&[], 2);
        let id = runner.id;
        registry.register_runner(runner);
        registry.set_runner_status(id, RunnerStatus::Draining);
        assert!(registry.try_reserve_slot(id).is_none());
        assert_eq!(registry.get_job_count(id), Some(0));
    }

    #[test]
    fn test_concurrent_reservations_respect_capacity() {
        let registry = Arc::new(RunnerRegistry::default());
        let runner = make_runner(&[], 3);
        let id = runner.id;
        registry.register_runner(runner);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.try_reserve_slot(id).is_some())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();

        assert_eq!(granted, 3);
        assert_eq!(registry.get_job_count(id), Some(3));
    }

    #[test]
    fn test_concurrent_heartbeats_keep_record_intact() {
        let registry = Arc::new(RunnerRegistry::default());
        let runner = make_runner(&["docker"], 4);
        let id = runner.id;
        registry.register_runner(runner);
        assert!(registry.increment_job_count(id));
        registry.set_runner_status(id, RunnerStatus::Busy);
        let before = registry.get_runner(id).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut last = None;
                    for _ in 0..200 {
                        assert!(registry.heartbeat(id));
                        let seen = registry.get_runner(id).unwrap().last_heartbeat;
                        if let Some(last) = last {
                            assert!(seen >= last, "heartbeat went backwards");
                        }
                        last = Some(seen);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let after = registry.get_runner(id).unwrap();
        assert!(after.last_heartbeat >= before.last_heartbeat);
        assert_eq!(after.current_jobs, 1);
        assert_eq!(after.status, RunnerStatus::Busy);
        assert_eq!(after.name, before.name);
        assert_eq!(after.capabilities, before.capabilities);
        assert_eq!(after.registered_at, before.registered_at);
    }

    #[test]
    fn test_runner_staleness_cleanup() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&[], 1);
        let id = runner.id;
        registry.register_runner(runner);
        registry.backdate_heartbeat(id, Duration::from_secs(90));

        // Still inside the active window and younger than max age.
        assert!(registry.cleanup_stale_runners(Duration::from_secs(300)).is_empty());
        assert!(registry.get_active_runners().iter().any(|r| r.id == id));

        assert_eq!(registry.cleanup_stale_runners(Duration::from_secs(60)), vec![id]);
        assert!(registry.get_active_runners().iter().all(|r| r.id != id));
        assert!(registry.get_runner(id).is_none());
    }

    #[test]
    fn test_unregister() {
        let registry = RunnerRegistry::default();
        let runner = make_runner(&[], 1);
        let id = runner.id;
        registry.register_runner(runner);
        assert!(registry.unregister_runner(id));
        assert!(!registry.unregister_runner(id));
        assert!(registry.get_runner(id).is_none());
    }
}

//! Application state.

use conveyor_config::SchedulerConfig;
use conveyor_scheduler::Scheduler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::with_scheduler(Scheduler::new(config))
    }

    pub fn with_scheduler(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

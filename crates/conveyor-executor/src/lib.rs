//! Job execution for Conveyor runners.
//!
//! Provides:
//! - A Docker container runtime
//! - The step and job runners that drive a job through its containers
//! - The runner agent: registration, heartbeats and the job poll loop
//! - An HTTP client for the scheduler's runner-facing surface

pub mod agent;
pub mod client;
pub mod docker;
pub mod job_runner;
pub mod step;

#[cfg(test)]
mod mock;

pub use agent::RunnerAgent;
pub use client::HttpSchedulerClient;
pub use docker::DockerRuntime;
pub use job_runner::JobRunner;
pub use step::{StepOutcome, StepRunner};

//! KDL configuration parsing for Conveyor.
//!
//! This crate handles parsing of:
//! - System configuration (`scheduler` and `runner` blocks)
//! - Job definitions submitted from files

pub mod error;
pub mod job;
mod node;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use job::parse_job;
pub use system::{RunnerConfig, SchedulerConfig, SystemConfig, load_system_config, parse_system_config};

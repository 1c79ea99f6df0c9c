//! Job scheduling for Conveyor.
//!
//! Holds the priority job queue and the runner registry, and mediates between
//! them: submissions go into the queue, runners pull work matching their
//! capabilities, completions flow back. All state lives in in-process
//! concurrent structures.

pub mod cleanup;
mod dispatch;
pub mod logs;
pub mod queue;
pub mod registry;
pub mod scheduler;
mod shard;

pub use cleanup::CleanupLoop;
pub use logs::{LogChunk, LogStore};
pub use queue::{JobQueue, QueuedJob, RunningJob};
pub use registry::RunnerRegistry;
pub use scheduler::{CleanupReport, Scheduler};

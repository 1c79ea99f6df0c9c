//! Core domain types and traits for the Conveyor job execution platform.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Job, step and priority definitions
//! - Runner descriptions and statuses
//! - Capability derivation from step images
//! - Collaborator traits (container runtime, job server, scheduler client)

pub mod capability;
pub mod client;
pub mod error;
pub mod id;
pub mod job;
pub mod runner;
pub mod runtime;

pub use capability::{BASE_CAPABILITY, required_capabilities};
pub use error::{Error, Result};
pub use id::{JobId, ResourceId, RunnerId, StepId};

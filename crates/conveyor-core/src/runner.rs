//! Runner descriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::{Error, Result, RunnerId};

/// Health and availability of a runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    #[default]
    Idle,
    Busy,
    Offline,
    /// Finish current work, accept nothing new.
    Draining,
}

impl RunnerStatus {
    /// Whether a runner in this status may be handed new work.
    pub fn accepts_work(&self) -> bool {
        matches!(self, RunnerStatus::Idle | RunnerStatus::Busy)
    }
}

impl std::str::FromStr for RunnerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(RunnerStatus::Idle),
            "busy" => Ok(RunnerStatus::Busy),
            "offline" => Ok(RunnerStatus::Offline),
            "draining" => Ok(RunnerStatus::Draining),
            other => Err(Error::InvalidInput(format!(
                "unknown runner status: {}",
                other
            ))),
        }
    }
}

/// What a runner declares about itself when registering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerRegistration {
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A registered runner as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub id: RunnerId,
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_jobs: usize,
    /// Jobs currently assigned; never exceeds `max_concurrent_jobs`.
    #[serde(default)]
    pub current_jobs: usize,
    pub status: RunnerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub version: String,
    pub platform: String,
    pub labels: HashMap<String, String>,
}

impl RunnerInfo {
    /// Build the registry record for a registration under a freshly assigned id.
    pub fn from_registration(id: RunnerId, registration: RunnerRegistration) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: registration.name,
            capabilities: registration.capabilities,
            max_concurrent_jobs: registration.max_concurrent_jobs.max(1),
            current_jobs: 0,
            status: RunnerStatus::Idle,
            registered_at: now,
            last_heartbeat: now,
            version: registration.version,
            platform: registration.platform,
            labels: registration.labels,
        }
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.current_jobs < self.max_concurrent_jobs
    }

    pub fn has_capabilities<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required
            .into_iter()
            .all(|capability| self.capabilities.contains(capability))
    }
}

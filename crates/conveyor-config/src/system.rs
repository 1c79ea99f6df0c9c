//! System configuration parsing.

use crate::node::{get_all_string_args, get_string_map, require_string_arg, require_u64_arg};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub scheduler: SchedulerConfig,
    pub runner: RunnerConfig,
}

/// Scheduler-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Address the HTTP surface binds to.
    pub listen: String,
    /// A runner counts as active while its last heartbeat is younger than this.
    pub active_window: Duration,
    /// Runners silent for longer than this are evicted by the cleanup loop.
    pub stale_runner_age: Duration,
    pub cleanup_interval: Duration,
    /// How long terminal job statuses and their logs are retained.
    pub status_retention: Duration,
    /// Upper bound on pending jobs; `None` means unbounded.
    pub max_pending_jobs: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            active_window: Duration::from_secs(120),
            stale_runner_age: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(30),
            status_retention: Duration::from_secs(3600),
            max_pending_jobs: Some(10_000),
        }
    }
}

/// Runner-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub name: String,
    /// Base URL of the scheduler's HTTP surface.
    pub api_url: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_jobs: usize,
    pub version: String,
    pub platform: String,
    pub labels: HashMap<String, String>,
    pub heartbeat_interval: Duration,
    /// Back-off between job requests that return nothing.
    pub poll_interval: Duration,
    /// How often a running job checks for cancellation.
    pub cancel_poll_interval: Duration,
    /// Grace period between a stop request and a forced kill.
    pub stop_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "runner".to_string(),
            api_url: "http://localhost:3000".to_string(),
            capabilities: ["container-runtime", "docker", "linux"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_concurrent_jobs: 1,
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            labels: HashMap::new(),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
            cancel_poll_interval: Duration::from_millis(1000),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Parse system configuration from KDL text. Absent keys keep their defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen_scheduler = false;
    let mut seen_runner = false;

    for node in doc.nodes() {
        match node.name().value() {
            "scheduler" => {
                if std::mem::replace(&mut seen_scheduler, true) {
                    return Err(ConfigError::Duplicate("scheduler".to_string()));
                }
                parse_scheduler(node, &mut config.scheduler)?;
            }
            "runner" => {
                if std::mem::replace(&mut seen_runner, true) {
                    return Err(ConfigError::Duplicate("runner".to_string()));
                }
                parse_runner(node, &mut config.runner)?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Load configuration from a file. A missing file yields the defaults.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => parse_system_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SystemConfig::default()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_scheduler(node: &KdlNode, config: &mut SchedulerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        match child.name().value() {
            "listen" => config.listen = require_string_arg(child, "listen")?,
            "active-window-secs" => {
                config.active_window = positive_secs(child)?;
            }
            "stale-runner-secs" => {
                config.stale_runner_age = positive_secs(child)?;
            }
            "cleanup-interval-secs" => {
                config.cleanup_interval = positive_secs(child)?;
            }
            "status-retention-secs" => {
                config.status_retention = Duration::from_secs(require_u64_arg(child)?);
            }
            "max-pending-jobs" => {
                let max = require_u64_arg(child)? as usize;
                config.max_pending_jobs = (max > 0).then_some(max);
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_runner(node: &KdlNode, config: &mut RunnerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        match child.name().value() {
            "name" => config.name = require_string_arg(child, "runner name")?,
            "api-url" => config.api_url = require_string_arg(child, "api-url")?,
            "capabilities" => {
                config.capabilities = get_all_string_args(child).into_iter().collect();
            }
            "max-concurrent-jobs" => {
                let max = require_u64_arg(child)?;
                if max == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "max-concurrent-jobs".to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                config.max_concurrent_jobs = max as usize;
            }
            "version" => config.version = require_string_arg(child, "version")?,
            "platform" => config.platform = require_string_arg(child, "platform")?,
            "labels" => config.labels = get_string_map(child),
            "heartbeat-interval-secs" => {
                config.heartbeat_interval = positive_secs(child)?;
            }
            "poll-interval-ms" => {
                config.poll_interval = positive_millis(child)?;
            }
            "cancel-poll-interval-ms" => {
                config.cancel_poll_interval = positive_millis(child)?;
            }
            "stop-grace-secs" => {
                config.stop_grace = Duration::from_secs(require_u64_arg(child)?);
            }
            _ => {}
        }
    }
    Ok(())
}

fn positive_secs(node: &KdlNode) -> ConfigResult<Duration> {
    positive(node).map(Duration::from_secs)
}

fn positive_millis(node: &KdlNode) -> ConfigResult<Duration> {
    positive(node).map(Duration::from_millis)
}

fn positive(node: &KdlNode) -> ConfigResult<u64> {
    match require_u64_arg(node)? {
        0 => Err(ConfigError::InvalidValue {
            field: node.name().value().to_string(),
            message: "must be positive".to_string(),
        }),
        value => Ok(value),
    }
}

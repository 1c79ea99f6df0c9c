//! Job definition parsing.

use crate::node::{
    get_first_string_arg, get_string_map, get_u64_prop, require_string_arg, require_u64_arg,
};
use crate::{ConfigError, ConfigResult};
use conveyor_core::job::{JobSpec, StepSpec};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;

/// Parse a job definition from KDL text.
///
/// ```text
/// job "build" timeout=600 {
///     repository "https://example.com/repo.git"
///     step "compile" {
///         image "rust:1.85"
///         run "cargo build"
///     }
/// }
/// ```
pub fn parse_job(kdl: &str) -> ConfigResult<JobSpec> {
    let doc: KdlDocument = kdl.parse()?;

    let mut jobs = doc.nodes().iter().filter(|n| n.name().value() == "job");
    let node = jobs
        .next()
        .ok_or_else(|| ConfigError::MissingField("job".to_string()))?;
    if jobs.next().is_some() {
        return Err(ConfigError::Duplicate("job".to_string()));
    }

    let name = require_string_arg(node, "job name")?;
    let timeout_secs = get_u64_prop(node, "timeout")?;
    if timeout_secs == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "timeout".to_string(),
            message: "must be positive".to_string(),
        });
    }

    let mut repository = None;
    let mut steps = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "repository" => {
                    repository = get_first_string_arg(child);
                }
                "step" => {
                    steps.push(parse_step(child)?);
                }
                _ => {} // Ignore unknown nodes
            }
        }
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "steps for job '{}'",
            name
        )));
    }

    let mut seen = HashSet::new();
    for step in &steps {
        if !seen.insert(step.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("step '{}'", step.name)));
        }
    }

    Ok(JobSpec {
        name,
        repository,
        steps,
        timeout_secs,
    })
}

fn parse_step(node: &KdlNode) -> ConfigResult<StepSpec> {
    let name = require_string_arg(node, "step name")?;

    let mut image = String::new();
    let mut commands = Vec::new();
    let mut working_dir = None;
    let mut env = Default::default();
    let mut timeout_secs = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    image = get_first_string_arg(child).unwrap_or_default();
                }
                "run" => {
                    if let Some(cmd) = get_first_string_arg(child) {
                        commands.push(cmd);
                    }
                }
                "workdir" => {
                    working_dir = get_first_string_arg(child);
                }
                "timeout" => {
                    timeout_secs = Some(require_u64_arg(child)?);
                }
                "env" => {
                    env = get_string_map(child);
                }
                _ => {}
            }
        }
    }

    if image.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "image for step '{}'",
            name
        )));
    }
    if commands.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "run for step '{}'",
            name
        )));
    }

    Ok(StepSpec {
        name,
        image,
        commands,
        working_dir,
        env,
        timeout_secs,
    })
}

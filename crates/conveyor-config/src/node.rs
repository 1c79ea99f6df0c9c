// Helper functions for extracting values from KDL nodes

use kdl::KdlNode;
use std::collections::HashMap;

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// First positional argument as a non-negative integer.
pub(crate) fn get_first_u64_arg(node: &KdlNode) -> ConfigResult<Option<u64>> {
    let Some(entry) = node.entries().iter().find(|e| e.name().is_none()) else {
        return Ok(None);
    };
    let value = entry.value().as_integer().ok_or_else(|| invalid_integer(node, "not an integer"))?;
    u64::try_from(value)
        .map(Some)
        .map_err(|_| invalid_integer(node, "must not be negative"))
}

/// A required string argument; a missing one is reported with `field`.
pub(crate) fn require_string_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

/// A required integer argument.
pub(crate) fn require_u64_arg(node: &KdlNode) -> ConfigResult<u64> {
    get_first_u64_arg(node)?.ok_or_else(|| invalid_integer(node, "missing value"))
}

pub(crate) fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    let value = value.as_integer().ok_or_else(|| ConfigError::InvalidValue {
        field: name.to_string(),
        message: "not an integer".to_string(),
    })?;
    u64::try_from(value)
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            message: "must not be negative".to_string(),
        })
}

/// Children of the form `KEY "value"` collected into a map.
pub(crate) fn get_string_map(node: &KdlNode) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                map.insert(key, val);
            }
        }
    }
    map
}

fn invalid_integer(node: &KdlNode, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: node.name().value().to_string(),
        message: message.to_string(),
    }
}

//! Errors raised while reading system configuration and job definitions.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    /// A node or argument the document must carry is absent.
    #[error("missing {0}")]
    MissingField(String),

    #[error("{field}: {message}")]
    InvalidValue { field: String, message: String },

    /// A block that may appear once appears again (`job`, `runner`, a step name).
    #[error("{0} is defined more than once")]
    Duplicate(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

//! Configuration parsing and validation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("empty configuration")]
    Empty,

    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("{target} depends on {dependency} which does not exist")]
    MissingDependency { target: String, dependency: String },

    #[error("cycle detected in dependencies: {0}")]
    CycleDetected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

//! KDL configuration parsing for Conductor.
//!
//! This crate handles:
//! - Per-repository build configuration (`.ci.kdl`) and its validation
//! - Presubmit/postsubmit target selection for a branch
//! - System configuration (supported repositories, legacy builders)

pub mod ci;
pub mod error;
mod nodes;
pub mod select;
pub mod system;

pub use ci::{BranchPattern, CiConfig, DEFAULT_CONFIG_PATH, Target, parse_ci_config};
pub use error::{ConfigError, ConfigResult};
pub use select::{postsubmit_targets, presubmit_targets};
pub use system::{RepositoryConfig, SystemConfig, load_system_config, parse_system_config};

//! System configuration parsing.
//!
//! ```kdl
//! config_path ".ci.kdl"
//! config_cache_ttl 60
//!
//! repository "acme/engine" {
//!     presubmit_builders "Linux legacy" "Mac legacy"
//!     postsubmit_builders "Linux legacy"
//! }
//! ```

use crate::ci::DEFAULT_CONFIG_PATH;
use crate::nodes::{get_all_string_args, get_first_string_arg};
use crate::{ConfigError, ConfigResult};
use conductor_core::RepositorySlug;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// System-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Path of the build configuration inside each repository.
    pub config_path: String,
    /// How long fetched configuration text may be reused. Zero disables caching.
    pub config_cache_ttl_secs: u64,
    /// Supported repositories. Events for anything else are ignored.
    pub repositories: Vec<RepositoryConfig>,
}

/// A supported repository and its static builder lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub slug: RepositorySlug,
    pub presubmit_builders: Vec<String>,
    pub postsubmit_builders: Vec<String>,
}

impl RepositoryConfig {
    pub fn new(slug: RepositorySlug) -> Self {
        Self {
            slug,
            presubmit_builders: Vec::new(),
            postsubmit_builders: Vec::new(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            config_cache_ttl_secs: 0,
            repositories: Vec::new(),
        }
    }
}

impl SystemConfig {
    pub fn repository(&self, slug: &RepositorySlug) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| &r.slug == slug)
    }

    pub fn is_supported(&self, slug: &RepositorySlug) -> bool {
        self.repository(slug).is_some()
    }
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "config_path" => {
                config.config_path = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("config_path value".to_string()))?;
            }
            "config_cache_ttl" => {
                config.config_cache_ttl_secs = parse_ttl(node)?;
            }
            "repository" => {
                let repo = parse_repository(node)?;
                if !seen.insert(repo.slug.clone()) {
                    return Err(ConfigError::Duplicate(format!(
                        "repository '{}' is declared more than once",
                        repo.slug
                    )));
                }
                config.repositories.push(repo);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a system configuration file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

fn parse_ttl(node: &KdlNode) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField("config_cache_ttl value".to_string()))?;

    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: "config_cache_ttl".to_string(),
        message: format!("{} is not a valid number of seconds", value),
    })
}

fn parse_repository(node: &KdlNode) -> ConfigResult<RepositoryConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("repository name".to_string()))?;
    let slug: RepositorySlug = name.parse().map_err(|e: conductor_core::Error| {
        ConfigError::InvalidValue {
            field: "repository".to_string(),
            message: e.to_string(),
        }
    })?;

    let mut repo = RepositoryConfig::new(slug);
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "presubmit_builders" => repo.presubmit_builders = get_all_string_args(child),
                "postsubmit_builders" => repo.postsubmit_builders = get_all_string_args(child),
                _ => {}
            }
        }
    }

    Ok(repo)
}

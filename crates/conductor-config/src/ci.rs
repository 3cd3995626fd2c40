//! Build configuration parsing and validation.
//!
//! A repository declares its build targets in a `.ci.kdl` file:
//!
//! ```kdl
//! enabled_branches "main" "release-.*"
//!
//! target "linux_build" {
//!     builder "Linux build"
//! }
//!
//! target "linux_test" postsubmit=#false timeout=60 {
//!     dependencies "linux_build"
//!     properties {
//!         shard "test"
//!     }
//! }
//! ```

use crate::nodes::{
    get_all_string_args, get_bool_prop, get_first_string_arg, get_integer_prop, get_string_list_prop,
    get_string_map, get_string_prop, has_list_prop,
};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Location of the build configuration inside a repository.
pub const DEFAULT_CONFIG_PATH: &str = ".ci.kdl";

/// A branch filter. Patterns are regular expressions that must match the
/// whole branch name.
#[derive(Debug, Clone)]
pub struct BranchPattern {
    source: String,
    regex: Regex,
}

impl BranchPattern {
    pub fn new(pattern: &str) -> ConfigResult<Self> {
        let regex =
            Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| ConfigError::InvalidValue {
                field: "enabled_branches".to_string(),
                message: format!("'{}' is not a valid pattern: {}", pattern, e),
            })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, branch: &str) -> bool {
        self.regex.is_match(branch)
    }
}

impl PartialEq for BranchPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for BranchPattern {}

/// A named unit of build work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    /// Builder the target runs on. Defaults to the target name.
    pub builder: String,
    pub presubmit: bool,
    pub postsubmit: bool,
    /// Bringup targets are still being stabilised and never gate presubmit.
    pub bringup: bool,
    /// `None` means the configuration's global list applies.
    pub enabled_branches: Option<Vec<BranchPattern>>,
    pub dependencies: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub timeout_minutes: Option<u32>,
}

impl Target {
    /// A builder from the static legacy list, which runs on every branch.
    pub fn legacy(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            builder: name.clone(),
            name,
            presubmit: true,
            postsubmit: true,
            bringup: false,
            enabled_branches: None,
            dependencies: Vec::new(),
            properties: BTreeMap::new(),
            timeout_minutes: None,
        }
    }

    /// Whether this target is enabled for `branch`, falling back to `default`
    /// when the target has no branch list of its own.
    pub fn runs_on(&self, branch: &str, default: &[BranchPattern]) -> bool {
        self.enabled_branches
            .as_deref()
            .unwrap_or(default)
            .iter()
            .any(|p| p.matches(branch))
    }
}

/// A validated build configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiConfig {
    pub enabled_branches: Vec<BranchPattern>,
    pub targets: Vec<Target>,
}

impl CiConfig {
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// Parse and validate a build configuration.
///
/// Checks, in order: non-empty text, KDL syntax and schema, unique target
/// names, resolvable dependencies, acyclic dependencies.
pub fn parse_ci_config(text: &str) -> ConfigResult<CiConfig> {
    if text.trim().is_empty() {
        return Err(ConfigError::Empty);
    }

    let doc: KdlDocument = text.parse()?;

    let mut enabled_branches = None;
    let mut targets = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "enabled_branches" => {
                enabled_branches = Some(parse_patterns(get_all_string_args(node))?);
            }
            "target" => {
                targets.push(parse_target(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let enabled_branches = match enabled_branches {
        Some(patterns) if !patterns.is_empty() => patterns,
        _ => return Err(ConfigError::MissingField("enabled_branches".to_string())),
    };

    let mut seen = HashSet::new();
    for target in &targets {
        if !seen.insert(target.name.as_str()) {
            return Err(ConfigError::Duplicate(format!(
                "target '{}' is declared more than once",
                target.name
            )));
        }
    }

    for target in &targets {
        for dep in &target.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(ConfigError::MissingDependency {
                    target: target.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if let Err(cycle) = detect_cycle(&targets) {
        return Err(ConfigError::CycleDetected(cycle));
    }

    Ok(CiConfig {
        enabled_branches,
        targets,
    })
}

fn parse_target(node: &KdlNode) -> ConfigResult<Target> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("target name".to_string()))?;

    let mut builder = get_string_prop(node, "builder");
    let mut properties = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "builder" => {
                    builder = get_first_string_arg(child);
                }
                "properties" => {
                    properties = get_string_map(child);
                }
                _ => {}
            }
        }
    }

    let enabled_branches = if has_list_prop(node, "enabled_branches") {
        Some(parse_patterns(get_string_list_prop(node, "enabled_branches"))?)
    } else {
        None
    };

    let timeout_minutes = match get_integer_prop(node, "timeout") {
        Some(minutes) => Some(u32::try_from(minutes).map_err(|_| ConfigError::InvalidValue {
            field: format!("timeout of target '{}'", name),
            message: format!("{} is not a valid number of minutes", minutes),
        })?),
        None => None,
    };

    Ok(Target {
        builder: builder.unwrap_or_else(|| name.clone()),
        presubmit: get_bool_prop(node, "presubmit").unwrap_or(true),
        postsubmit: get_bool_prop(node, "postsubmit").unwrap_or(true),
        bringup: get_bool_prop(node, "bringup").unwrap_or(false),
        enabled_branches,
        dependencies: get_string_list_prop(node, "dependencies"),
        properties,
        timeout_minutes,
        name,
    })
}

fn parse_patterns(patterns: Vec<String>) -> ConfigResult<Vec<BranchPattern>> {
    patterns.iter().map(|p| BranchPattern::new(p)).collect()
}

/// Detect cycles in the target dependency graph using DFS.
fn detect_cycle(targets: &[Target]) -> Result<(), String> {
    let mut visited = HashMap::new();
    let mut rec_stack = HashMap::new();

    let target_map: HashMap<&str, &Target> =
        targets.iter().map(|t| (t.name.as_str(), t)).collect();

    for target in targets {
        if !visited.contains_key(target.name.as_str()) {
            if let Some(cycle) =
                dfs_detect_cycle(&target.name, &target_map, &mut visited, &mut rec_stack)
            {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    target_map: &HashMap<&'a str, &'a Target>,
    visited: &mut HashMap<&'a str, bool>,
    rec_stack: &mut HashMap<&'a str, bool>,
) -> Option<String> {
    visited.insert(node, true);
    rec_stack.insert(node, true);

    if let Some(target) = target_map.get(node) {
        for dep in &target.dependencies {
            let dep_str: &'a str = dep.as_str();
            if !visited.contains_key(dep_str) {
                if let Some(cycle) = dfs_detect_cycle(dep_str, target_map, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.get(dep_str).copied().unwrap_or(false) {
                return Some(format!("{} -> {}", node, dep));
            }
        }
    }

    rec_stack.insert(node, false);
    None
}

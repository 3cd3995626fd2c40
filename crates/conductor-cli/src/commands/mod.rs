//! CLI command implementations.

use anyhow::{Context, Result, bail};
use conductor_config::{Target, load_system_config, parse_ci_config, postsubmit_targets, presubmit_targets};
use conductor_core::RepositorySlug;
use std::path::Path;
use tracing::debug;

/// Static builder lists of one repository from the system configuration.
#[derive(Debug, Default)]
pub struct LegacyBuilders {
    pub presubmit: Vec<String>,
    pub postsubmit: Vec<String>,
}

pub fn legacy_builders(system: &Path, repo: &str) -> Result<LegacyBuilders> {
    let slug: RepositorySlug = repo.parse()?;
    let config = load_system_config(system)
        .with_context(|| format!("failed to load {}", system.display()))?;

    let Some(repository) = config.repository(&slug) else {
        bail!("{} is not listed in {}", slug, system.display());
    };
    debug!(
        repo = %slug,
        presubmit = repository.presubmit_builders.len(),
        postsubmit = repository.postsubmit_builders.len(),
        "Loaded legacy builders"
    );

    Ok(LegacyBuilders {
        presubmit: repository.presubmit_builders.clone(),
        postsubmit: repository.postsubmit_builders.clone(),
    })
}

pub fn validate(path: &Path, branch: &str, legacy: &LegacyBuilders) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    print!("{}", report(&content, branch, legacy)?);
    Ok(())
}

/// Validate `content` and describe the targets `branch` would run.
fn report(content: &str, branch: &str, legacy: &LegacyBuilders) -> Result<String> {
    let config = match parse_ci_config(content) {
        Ok(config) => config,
        Err(e) => bail!("Configuration error: {}", e),
    };

    let mut out = format!("Configuration is valid ({} targets)\n", config.targets.len());
    write_targets(
        &mut out,
        &format!("Presubmit targets for '{}'", branch),
        &presubmit_targets(&config, branch, &legacy.presubmit),
    );
    write_targets(
        &mut out,
        &format!("Postsubmit targets for '{}'", branch),
        &postsubmit_targets(&config, branch, &legacy.postsubmit),
    );
    Ok(out)
}

fn write_targets(out: &mut String, heading: &str, targets: &[Target]) {
    out.push_str(&format!("{}:\n", heading));
    if targets.is_empty() {
        out.push_str("  (none)\n");
    }
    for target in targets {
        if target.builder == target.name {
            out.push_str(&format!("  {}\n", target.name));
        } else {
            out.push_str(&format!("  {} (builder: {})\n", target.name, target.builder));
        }
    }
}

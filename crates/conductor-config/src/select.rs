//! Target selection for a branch.
//!
//! Legacy builders come first, in the order given, followed by matching
//! configuration targets in declaration order. Names are not deduplicated.

use crate::ci::{CiConfig, Target};

/// Targets to run for a pull request against `branch`.
pub fn presubmit_targets(config: &CiConfig, branch: &str, legacy: &[String]) -> Vec<Target> {
    select(config, branch, legacy, |t| t.presubmit && !t.bringup)
}

/// Targets to run for a commit that landed on `branch`.
pub fn postsubmit_targets(config: &CiConfig, branch: &str, legacy: &[String]) -> Vec<Target> {
    select(config, branch, legacy, |t| t.postsubmit)
}

fn select(
    config: &CiConfig,
    branch: &str,
    legacy: &[String],
    wanted: impl Fn(&Target) -> bool,
) -> Vec<Target> {
    let mut targets: Vec<Target> = legacy.iter().map(|name| Target::legacy(name.as_str())).collect();

    targets.extend(
        config
            .targets
            .iter()
            .filter(|t| wanted(t) && t.runs_on(branch, &config.enabled_branches))
            .cloned(),
    );

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_ci_config;

    fn names(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.name.as_str()).collect()
    }

    fn config() -> CiConfig {
        parse_ci_config(
            r#"
            enabled_branches "main" "release-.*"

            target "linux_build"
            target "linux_test" postsubmit=#false
            target "mac_build" presubmit=#false
            target "windows_build" bringup=#true
            target "docs" enabled_branches="main"
            target "nightly" enabled_branches="nightly"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_presubmit_legacy_first_then_config_order() {
        let legacy = vec!["Legacy B".to_string(), "Legacy A".to_string()];
        let targets = presubmit_targets(&config(), "main", &legacy);

        assert_eq!(
            names(&targets),
            vec!["Legacy B", "Legacy A", "linux_build", "linux_test", "docs"]
        );
        assert_eq!(targets[0].builder, "Legacy B");
    }

    #[test]
    fn test_postsubmit_selection() {
        let targets = postsubmit_targets(&config(), "main", &[]);
        assert_eq!(
            names(&targets),
            vec!["linux_build", "mac_build", "windows_build", "docs"]
        );
    }

    #[test]
    fn test_branch_filters() {
        let targets = postsubmit_targets(&config(), "release-2.0", &[]);
        assert_eq!(names(&targets), vec!["linux_build", "mac_build", "windows_build"]);

        let targets = postsubmit_targets(&config(), "nightly", &[]);
        assert_eq!(names(&targets), vec!["nightly"]);
    }

    #[test]
    fn test_unmatched_branch_keeps_legacy_builders() {
        let legacy = vec!["Legacy".to_string()];
        let targets = presubmit_targets(&config(), "feature/x", &legacy);
        assert_eq!(names(&targets), vec!["Legacy"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let legacy = vec!["linux_build".to_string()];
        let targets = presubmit_targets(&config(), "main", &legacy);

        let count = targets.iter().filter(|t| t.name == "linux_build").count();
        assert_eq!(count, 2);
        assert_eq!(targets[0].name, "linux_build");
        assert_eq!(targets[1].name, "linux_build");
    }
}

//! The scheduler and the request helpers shared by its operations.

use conductor_config::{SystemConfig, Target};
use conductor_core::builds::{
    BatchRequest, BatchResponse, Build, BuildId, BuildService, BuildTags, ScheduleBuildRequest,
    tags,
};
use conductor_core::checks::{CheckRunId, CheckService};
use conductor_core::datastore::Datastore;
use conductor_core::fetch::ConfigFetcher;
use conductor_core::{Error, RepositorySlug, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::ConfigResolver;

/// A build Conductor scheduled for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTarget {
    pub name: String,
    pub builder: String,
    pub build_id: BuildId,
    /// Check run the build reports to, when known.
    pub check_run_id: Option<CheckRunId>,
}

impl ScheduledTarget {
    pub(crate) fn from_build(build: &Build, check_run_id: Option<CheckRunId>) -> Self {
        Self {
            name: build.target_name().to_string(),
            builder: build.builder.clone(),
            build_id: build.id,
            check_run_id,
        }
    }
}

/// Entry point for every scheduling operation.
///
/// Holds the configuration resolver and the collaborator handles. Cheap to
/// share behind an `Arc`.
pub struct Scheduler {
    pub(crate) resolver: ConfigResolver,
    pub(crate) datastore: Arc<dyn Datastore>,
    pub(crate) checks: Arc<dyn CheckService>,
    pub(crate) builds: Arc<dyn BuildService>,
    pub(crate) system: Arc<SystemConfig>,
}

impl Scheduler {
    pub fn new(
        system: Arc<SystemConfig>,
        fetcher: Arc<dyn ConfigFetcher>,
        datastore: Arc<dyn Datastore>,
        checks: Arc<dyn CheckService>,
        builds: Arc<dyn BuildService>,
    ) -> Self {
        let ttl = Duration::from_secs(system.config_cache_ttl_secs);
        Self {
            resolver: ConfigResolver::new(fetcher, ttl),
            datastore,
            checks,
            builds,
            system,
        }
    }

    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    pub(crate) fn legacy_presubmit(&self, slug: &RepositorySlug) -> &[String] {
        self.system
            .repository(slug)
            .map(|r| r.presubmit_builders.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn legacy_postsubmit(&self, slug: &RepositorySlug) -> &[String] {
        self.system
            .repository(slug)
            .map(|r| r.postsubmit_builders.as_slice())
            .unwrap_or_default()
    }

    /// Send schedule requests in one batch. Results are in request order; a
    /// per-request failure carries the backend's message.
    pub(crate) async fn schedule_batch(
        &self,
        requests: Vec<ScheduleBuildRequest>,
    ) -> Result<Vec<std::result::Result<Build, String>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let expected = requests.len();
        let responses = self
            .builds
            .batch(requests.into_iter().map(BatchRequest::Schedule).collect())
            .await?;

        if responses.len() != expected {
            return Err(Error::Backend(format!(
                "batch returned {} responses for {} requests",
                responses.len(),
                expected
            )));
        }

        Ok(responses
            .into_iter()
            .map(|response| match response {
                BatchResponse::Scheduled(build) => Ok(build),
                BatchResponse::Error { message } => Err(message),
                BatchResponse::Found(_) => Err("unexpected search response".to_string()),
            })
            .collect())
    }
}

/// Link to a pull request on the source-control provider.
pub(crate) fn pull_request_link(slug: &RepositorySlug, pr_number: u64) -> String {
    format!("https://github.com/{}/pull/{}", slug.full_name(), pr_number)
}

/// Tags for a fresh presubmit build of `target_name`.
fn presubmit_tags(
    slug: &RepositorySlug,
    pr_number: Option<u64>,
    sha: &str,
    check_run_id: CheckRunId,
    target_name: &str,
) -> BuildTags {
    let mut build_tags = BuildTags::new();
    if let Some(pr) = pr_number {
        build_tags.push(tags::BUILDSET, tags::pull_request_buildset(pr));
    }
    build_tags.push(tags::BUILDSET, tags::commit_buildset(sha));
    if let Some(pr) = pr_number {
        build_tags.push(tags::GITHUB_LINK, pull_request_link(slug, pr));
    }
    build_tags
        .with(tags::GITHUB_CHECKRUN, check_run_id.to_string())
        .with(tags::TARGET, target_name)
        .with(tags::USER_AGENT, tags::USER_AGENT_VALUE)
}

/// Request for a fresh presubmit build of `target`.
///
/// Without a pull request number the build is tied to the commit only and
/// carries no `git_ref`.
pub(crate) fn presubmit_request(
    slug: &RepositorySlug,
    pr_number: Option<u64>,
    sha: &str,
    check_run_id: CheckRunId,
    target: &Target,
) -> ScheduleBuildRequest {
    let mut properties: std::collections::HashMap<String, serde_json::Value> = target
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    properties.insert(
        "git_url".to_string(),
        format!("https://github.com/{}", slug.full_name()).into(),
    );
    if let Some(pr) = pr_number {
        properties.insert(
            "git_ref".to_string(),
            format!("refs/pull/{}/head", pr).into(),
        );
    }

    ScheduleBuildRequest {
        builder: target.builder.clone(),
        tags: presubmit_tags(slug, pr_number, sha, check_run_id, &target.name),
        properties,
        timeout_minutes: target.timeout_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presubmit_request_tags() {
        let slug = RepositorySlug::new("acme", "engine");
        let mut target = Target::legacy("linux_test");
        target.builder = "Linux test".to_string();
        target.timeout_minutes = Some(30);
        target
            .properties
            .insert("shard".to_string(), "1".to_string());

        let request = presubmit_request(&slug, Some(42), "abc", CheckRunId(7), &target);

        assert_eq!(request.builder, "Linux test");
        assert_eq!(request.timeout_minutes, Some(30));
        assert!(request.tags.contains(tags::BUILDSET, "pr/git/42"));
        assert!(request.tags.contains(tags::BUILDSET, "sha/git/abc"));
        assert_eq!(
            request.tags.get(tags::GITHUB_LINK),
            Some("https://github.com/acme/engine/pull/42")
        );
        assert_eq!(request.tags.get(tags::GITHUB_CHECKRUN), Some("7"));
        assert_eq!(request.tags.get(tags::TARGET), Some("linux_test"));
        assert_eq!(request.tags.get(tags::USER_AGENT), Some("conductor"));
        assert_eq!(request.properties["shard"], "1");
        assert_eq!(request.properties["git_ref"], "refs/pull/42/head");
    }

    #[test]
    fn test_request_without_pull_request() {
        let slug = RepositorySlug::new("acme", "engine");
        let request = presubmit_request(&slug, None, "abc", CheckRunId(7), &Target::legacy("linux"));

        assert_eq!(request.builder, "linux");
        assert_eq!(request.tags.get(tags::BUILDSET), Some("sha/git/abc"));
        assert!(request.tags.get(tags::GITHUB_LINK).is_none());
        assert!(!request.properties.contains_key("git_ref"));
        assert_eq!(request.properties["git_url"], "https://github.com/acme/engine");
    }
}

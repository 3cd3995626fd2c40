//! Build types and the build-execution backend trait.
//!
//! The backend owns builds and their status. Conductor schedules and searches
//! builds, correlating them with check runs through tags.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;
use crate::checks::CheckRunId;

/// Tag keys Conductor attaches to the builds it schedules.
pub mod tags {
    pub const BUILDSET: &str = "buildset";
    pub const GITHUB_LINK: &str = "github_link";
    pub const GITHUB_CHECKRUN: &str = "github_checkrun";
    pub const TARGET: &str = "target";
    pub const USER_AGENT: &str = "user_agent";

    pub const USER_AGENT_VALUE: &str = "conductor";

    /// Buildset value grouping every build of a pull request.
    pub fn pull_request_buildset(pr_number: u64) -> String {
        format!("pr/git/{}", pr_number)
    }

    /// Buildset value grouping every build of a commit.
    pub fn commit_buildset(sha: &str) -> String {
        format!("sha/git/{}", sha)
    }
}

/// Backend identifier of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub i64);

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a build in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Scheduled,
    Started,
    Success,
    Failure,
    InfraFailure,
    Canceled,
}

impl BuildStatus {
    /// Terminal states that warrant a retry.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BuildStatus::Failure | BuildStatus::InfraFailure | BuildStatus::Canceled
        )
    }
}

/// Ordered key/value tags. Keys may repeat (e.g. two `buildset` tags).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildTags(Vec<(String, String)>);

impl BuildTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `key` with a single `value`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value.into()));
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|(k, v)| k == key && v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for BuildTags {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A build known to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub builder: String,
    pub status: BuildStatus,
    pub tags: BuildTags,
    pub create_time: DateTime<Utc>,
    /// Input properties the build was scheduled with.
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

impl Build {
    /// Target this build ran for: the `target` tag, else the builder name.
    pub fn target_name(&self) -> &str {
        self.tags.get(tags::TARGET).unwrap_or(&self.builder)
    }

    /// Request for a new build with this build's builder, tags and inputs,
    /// reporting to `check_run_id`.
    pub fn rerun_request(&self, check_run_id: CheckRunId) -> ScheduleBuildRequest {
        let mut build_tags = self.tags.clone();
        build_tags.set(tags::GITHUB_CHECKRUN, check_run_id.to_string());
        ScheduleBuildRequest {
            builder: self.builder.clone(),
            tags: build_tags,
            properties: self.properties.clone(),
            timeout_minutes: self.timeout_minutes,
        }
    }
}

/// Request to schedule one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleBuildRequest {
    pub builder: String,
    pub tags: BuildTags,
    pub properties: HashMap<String, serde_json::Value>,
    /// Execution timeout in minutes, if the target sets one.
    pub timeout_minutes: Option<u32>,
}

/// Search filter; every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPredicate {
    pub builder: Option<String>,
    pub tags: BuildTags,
}

impl BuildPredicate {
    pub fn matches(&self, build: &Build) -> bool {
        if let Some(builder) = &self.builder {
            if &build.builder != builder {
                return false;
            }
        }
        self.tags.iter().all(|(k, v)| build.tags.contains(k, v))
    }
}

/// One sub-request of a batch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchRequest {
    Schedule(ScheduleBuildRequest),
    Search(BuildPredicate),
}

/// Response to the sub-request at the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchResponse {
    Scheduled(Build),
    Found(Vec<Build>),
    Error { message: String },
}

/// Trait for build-execution backends.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn schedule_build(&self, request: ScheduleBuildRequest) -> Result<Build>;

    async fn search_builds(&self, predicate: BuildPredicate) -> Result<Vec<Build>>;

    /// Run several requests in one backend round trip. Responses come back in
    /// request order.
    async fn batch(&self, requests: Vec<BatchRequest>) -> Result<Vec<BatchResponse>>;
}

/// The most recent build for every target name.
///
/// Most recent is the latest `create_time`; ties go to the larger id.
pub fn latest_by_target(builds: impl IntoIterator<Item = Build>) -> HashMap<String, Build> {
    let mut latest: HashMap<String, Build> = HashMap::new();
    for build in builds {
        let key = build.target_name().to_string();
        let newer = match latest.get(&key) {
            Some(current) => (build.create_time, build.id) > (current.create_time, current.id),
            None => true,
        };
        if newer {
            latest.insert(key, build);
        }
    }
    latest
}

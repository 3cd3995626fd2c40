//! Check-run types and the check-reporting backend trait.
//!
//! Check runs are owned by the reporting backend. Conductor creates, lists and
//! updates them but never stores them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{RepositorySlug, Result};

/// Name of the check run that reports configuration validation.
pub const CONFIG_VALIDATION_CHECK: &str = "config validation";

/// Backend identifier of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckRunId(pub i64);

impl std::fmt::Display for CheckRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Stale,
}

/// A check run as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: CheckRunId,
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub check_suite_id: Option<i64>,
}

/// Human-readable output attached to a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Fields to change on an existing check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRunUpdate {
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub output: Option<CheckRunOutput>,
}

impl CheckRunUpdate {
    /// Mark the run completed with `conclusion` and no output.
    pub fn completed(conclusion: CheckConclusion) -> Self {
        Self {
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
            output: None,
        }
    }

    pub fn with_output(mut self, output: CheckRunOutput) -> Self {
        self.output = Some(output);
        self
    }
}

/// Trait for check-reporting backends.
#[async_trait]
pub trait CheckService: Send + Sync {
    /// Create a queued check run named `name` on `head_sha`.
    async fn create_check_run(
        &self,
        slug: &RepositorySlug,
        name: &str,
        head_sha: &str,
    ) -> Result<CheckRun>;

    /// Update status, conclusion and output of an existing check run.
    async fn update_check_run(
        &self,
        slug: &RepositorySlug,
        check_run: &CheckRun,
        update: CheckRunUpdate,
    ) -> Result<()>;

    /// All check runs on `head_sha`, keyed by name.
    async fn list_check_runs(
        &self,
        slug: &RepositorySlug,
        head_sha: &str,
    ) -> Result<HashMap<String, CheckRun>>;
}

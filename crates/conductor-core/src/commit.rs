//! Commit and task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, TaskId};

/// An `owner/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositorySlug {
    pub owner: String,
    pub name: String,
}

impl RepositorySlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// The `owner/name` form used by the source-control provider.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositorySlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepositorySlug {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(Error::InvalidInput(format!(
                "repository slug must look like owner/name, got '{}'",
                s
            ))),
        }
    }
}

/// Identity of a commit: at most one [`Commit`] exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitKey {
    pub repository: RepositorySlug,
    pub branch: String,
    pub sha: String,
}

impl std::fmt::Display for CommitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.repository, self.branch, self.sha)
    }
}

/// A commit that landed on a branch of a supported repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub repository: RepositorySlug,
    pub branch: String,
    pub sha: String,
    pub author: String,
    pub author_avatar_url: String,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Commit {
    pub fn key(&self) -> CommitKey {
        CommitKey {
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            sha: self.sha.clone(),
        }
    }
}

/// A commit as reported by a push, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEvent {
    pub repository: RepositorySlug,
    pub branch: String,
    pub sha: String,
    pub author: String,
    pub author_avatar_url: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<CommitEvent> for Commit {
    fn from(event: CommitEvent) -> Self {
        Commit {
            repository: event.repository,
            branch: event.branch,
            sha: event.sha,
            author: event.author,
            author_avatar_url: event.author_avatar_url,
            message: event.message,
            timestamp: event.timestamp.timestamp_millis(),
        }
    }
}

/// Execution status of a postsubmit task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    InProgress,
    Succeeded,
    Failed,
    InfraFailure,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::InfraFailure => "infra_failure",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(TaskStatus::New),
            "in_progress" => Ok(TaskStatus::InProgress),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "infra_failure" => Ok(TaskStatus::InfraFailure),
            "skipped" => Ok(TaskStatus::Skipped),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// One postsubmit execution of one target against one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub commit: CommitKey,
    /// Target name from the build configuration.
    pub name: String,
    /// Builder the target runs on.
    pub builder_name: String,
    /// Inherited from the owning commit, in epoch milliseconds.
    pub create_timestamp: i64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub bringup: bool,
}

impl Task {
    /// A fresh, unscheduled task for `commit`.
    pub fn new(
        commit: &Commit,
        name: impl Into<String>,
        builder_name: impl Into<String>,
        bringup: bool,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            commit: commit.key(),
            name: name.into(),
            builder_name: builder_name.into(),
            create_timestamp: commit.timestamp,
            status: TaskStatus::New,
            attempts: 0,
            bringup,
        }
    }
}

//! Decoded webhook payloads.
//!
//! Each event kind has its own type. Required fields and action names are
//! validated during decoding; fields Conductor does not read are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checks::{CheckConclusion, CheckRun, CheckRunId, CheckStatus};
use crate::{CommitEvent, RepositorySlug};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unsupported event kind: {0}")]
    UnsupportedKind(String),

    #[error("invalid {kind} payload: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid repository in {kind} payload: {message}")]
    Repository { kind: String, message: String },
}

/// A decoded webhook delivery.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Ping,
    Push(PushEvent),
    PullRequest(Box<PullRequestEvent>),
    CheckRun(CheckRunEvent),
    CheckSuite(CheckSuiteEvent),
}

impl WebhookEvent {
    /// Decode a delivery given its event kind header and raw body.
    pub fn decode(kind: &str, body: &[u8]) -> Result<Self, EventError> {
        let event = match kind {
            "ping" => WebhookEvent::Ping,
            "push" => WebhookEvent::Push(parse(kind, body)?),
            "pull_request" => WebhookEvent::PullRequest(Box::new(parse(kind, body)?)),
            "check_run" => WebhookEvent::CheckRun(parse(kind, body)?),
            "check_suite" => WebhookEvent::CheckSuite(parse(kind, body)?),
            other => return Err(EventError::UnsupportedKind(other.to_string())),
        };
        Ok(event)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Ping => "ping",
            WebhookEvent::Push(_) => "push",
            WebhookEvent::PullRequest(_) => "pull_request",
            WebhookEvent::CheckRun(_) => "check_run",
            WebhookEvent::CheckSuite(_) => "check_suite",
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(kind: &str, body: &[u8]) -> Result<T, EventError> {
    serde_json::from_slice(body).map_err(|source| EventError::Invalid {
        kind: kind.to_string(),
        source,
    })
}

/// Repository block shared by every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl RepositoryPayload {
    pub fn slug(&self) -> crate::Result<RepositorySlug> {
        self.full_name.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// `push` delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: String,
    pub repository: RepositoryPayload,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    #[serde(default)]
    pub sender: Option<User>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCommit {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub author: PushAuthor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAuthor {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl PushEvent {
    /// Branch name for branch pushes; `None` for tags and other refs.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// The pushed commits, ready for ingestion.
    ///
    /// Tag pushes and branch deletions carry nothing to ingest.
    pub fn commit_events(&self) -> Result<Vec<CommitEvent>, EventError> {
        let Some(branch) = self.branch() else {
            return Ok(Vec::new());
        };
        if self.deleted {
            return Ok(Vec::new());
        }

        let repository = self.repository.slug().map_err(|e| EventError::Repository {
            kind: "push".to_string(),
            message: e.to_string(),
        })?;
        let avatar_url = self
            .sender
            .as_ref()
            .map(|s| s.avatar_url.clone())
            .unwrap_or_default();

        Ok(self
            .commits
            .iter()
            .map(|c| CommitEvent {
                repository: repository.clone(),
                branch: branch.to_string(),
                sha: c.id.clone(),
                author: c
                    .author
                    .username
                    .clone()
                    .unwrap_or_else(|| c.author.name.clone()),
                author_avatar_url: avatar_url.clone(),
                message: c.message.clone(),
                timestamp: c.timestamp,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    Edited,
    Assigned,
    Unassigned,
    Labeled,
    Unlabeled,
    Locked,
    Unlocked,
    Milestoned,
    Demilestoned,
    ReviewRequested,
    ReviewRequestRemoved,
    ReadyForReview,
    ConvertedToDraft,
    AutoMergeEnabled,
    AutoMergeDisabled,
    Enqueued,
    Dequeued,
}

/// `pull_request` delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub user: User,
    pub head: BranchRef,
    pub base: BaseRef,
}

impl PullRequest {
    pub fn slug(&self) -> crate::Result<RepositorySlug> {
        self.base.repo.slug()
    }
}

/// A branch tip referenced by a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub repo: RepositoryPayload,
}

/// Minimal pull request reference embedded in check payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestLink {
    pub number: u64,
    pub head: BranchRef,
    pub base: BranchRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunAction {
    Created,
    Completed,
    Rerequested,
    RequestedAction,
}

/// `check_run` delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunEvent {
    pub action: CheckRunAction,
    pub check_run: CheckRunPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunPayload {
    pub id: i64,
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub conclusion: Option<CheckConclusion>,
    #[serde(default)]
    pub check_suite: Option<CheckSuiteLink>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSuiteLink {
    pub id: i64,
}

impl CheckRunPayload {
    pub fn to_check_run(&self) -> CheckRun {
        CheckRun {
            id: CheckRunId(self.id),
            name: self.name.clone(),
            head_sha: self.head_sha.clone(),
            status: self.status,
            conclusion: self.conclusion,
            check_suite_id: self.check_suite.map(|s| s.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSuiteAction {
    Completed,
    Requested,
    Rerequested,
}

/// `check_suite` delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSuiteEvent {
    pub action: CheckSuiteAction,
    pub check_suite: CheckSuitePayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSuitePayload {
    pub id: i64,
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestLink>,
}

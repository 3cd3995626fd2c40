//! Commit and task ingestion for postsubmit.

use chrono::Utc;
use conductor_config::{CiConfig, ConfigResult, Target, postsubmit_targets};
use conductor_core::events::PullRequest;
use conductor_core::{Commit, CommitEvent, Error, Result, Task};
use tracing::{debug, info, warn};

use crate::Scheduler;

impl Scheduler {
    /// Persist new commits together with one task per postsubmit target.
    ///
    /// Commits are processed in order, each in its own transaction. Commits of
    /// unsupported repositories, already-known commits, commits with an
    /// invalid configuration and commits whose insert fails are skipped.
    /// Lookup and configuration fetch failures abort the call so the event can
    /// be redelivered. Returns the commits actually inserted.
    pub async fn add_commits(&self, events: Vec<CommitEvent>) -> Result<Vec<Commit>> {
        let mut inserted = Vec::new();

        for event in events {
            let commit = Commit::from(event);
            let key = commit.key();

            if !self.system.is_supported(&commit.repository) {
                debug!(repo = %commit.repository, "Skipping commit of unsupported repository");
                continue;
            }

            if self.datastore.lookup_commit(&key).await?.is_some() {
                debug!(commit = %key, "Commit already exists");
                continue;
            }

            let tasks = match self.postsubmit_tasks(&commit).await? {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(commit = %key, error = %e, "Invalid configuration, skipping commit");
                    continue;
                }
            };

            match self.datastore.insert_commit(&commit, &tasks).await {
                Ok(()) => {
                    info!(commit = %key, tasks = tasks.len(), "Inserted commit");
                    inserted.push(commit);
                }
                Err(e) => {
                    warn!(commit = %key, error = %e, "Commit transaction rejected");
                }
            }
        }

        Ok(inserted)
    }

    /// Persist the merge commit of a merged pull request.
    ///
    /// Returns `None` when the pull request is not merged, belongs to an
    /// unsupported repository, its merge commit is already known, or its
    /// configuration is invalid.
    pub async fn add_pull_request(&self, pr: &PullRequest) -> Result<Option<Commit>> {
        if !pr.merged {
            debug!(pr = pr.number, "Pull request not merged");
            return Ok(None);
        }

        let slug = pr.slug()?;
        if !self.system.is_supported(&slug) {
            debug!(repo = %slug, pr = pr.number, "Skipping pull request of unsupported repository");
            return Ok(None);
        }

        let sha = pr.merge_commit_sha.clone().ok_or_else(|| {
            Error::InvalidInput(format!(
                "merged pull request #{} has no merge commit",
                pr.number
            ))
        })?;

        let commit = Commit {
            repository: slug,
            branch: pr.base.git_ref.clone(),
            sha,
            author: pr.user.login.clone(),
            author_avatar_url: pr.user.avatar_url.clone(),
            message: pr.title.clone(),
            timestamp: pr.merged_at.unwrap_or_else(Utc::now).timestamp_millis(),
        };
        let key = commit.key();

        if self.datastore.lookup_commit(&key).await?.is_some() {
            debug!(commit = %key, pr = pr.number, "Merge commit already exists");
            return Ok(None);
        }

        let tasks = match self.postsubmit_tasks(&commit).await? {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(commit = %key, pr = pr.number, error = %e, "Invalid configuration, skipping merge commit");
                return Ok(None);
            }
        };

        match self.datastore.insert_commit(&commit, &tasks).await {
            Ok(()) => {
                info!(commit = %key, pr = pr.number, tasks = tasks.len(), "Inserted merge commit");
                Ok(Some(commit))
            }
            Err(e) if e.is_conflict() => {
                debug!(commit = %key, "Merge commit inserted concurrently");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Postsubmit targets of `commit` under an already resolved configuration.
    pub fn get_postsubmit_targets(&self, commit: &Commit, config: &CiConfig) -> Vec<Target> {
        postsubmit_targets(
            config,
            &commit.branch,
            self.legacy_postsubmit(&commit.repository),
        )
    }

    async fn postsubmit_tasks(&self, commit: &Commit) -> Result<ConfigResult<Vec<Task>>> {
        let config = match self.resolver.resolve(&commit.repository, &commit.sha).await? {
            Ok(config) => config,
            Err(e) => return Ok(Err(e)),
        };

        Ok(Ok(self
            .get_postsubmit_targets(commit, &config)
            .into_iter()
            .map(|t| Task::new(commit, t.name, t.builder, t.bringup))
            .collect()))
    }
}

//! Presubmit triggering for pull requests.

use conductor_config::{ConfigResult, Target, presubmit_targets};
use conductor_core::checks::{
    CONFIG_VALIDATION_CHECK, CheckConclusion, CheckRun, CheckRunOutput, CheckRunUpdate,
};
use conductor_core::{Commit, RepositorySlug, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::Scheduler;
use crate::scheduler::{ScheduledTarget, presubmit_request};

/// Result of triggering presubmit for a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PresubmitOutcome {
    /// The configuration failed validation; the message was reported on the
    /// validation check run and nothing was scheduled.
    InvalidConfig(String),
    /// Builds scheduled, in target order.
    Triggered(Vec<ScheduledTarget>),
}

impl Scheduler {
    /// Presubmit targets for a pull request whose head is `commit`.
    ///
    /// `commit.branch` is the pull request's base branch. Read-only.
    pub async fn get_presubmit_targets(
        &self,
        commit: &Commit,
        pr_number: u64,
    ) -> Result<ConfigResult<Vec<Target>>> {
        let config = match self.resolver.resolve(&commit.repository, &commit.sha).await? {
            Ok(config) => config,
            Err(e) => {
                warn!(repo = %commit.repository, pr = pr_number, sha = %commit.sha, error = %e, "Invalid configuration");
                return Ok(Err(e));
            }
        };

        Ok(Ok(presubmit_targets(
            &config,
            &commit.branch,
            self.legacy_presubmit(&commit.repository),
        )))
    }

    /// Validate the configuration at `commit_sha` and schedule every
    /// presubmit target, each with its own check run.
    ///
    /// The validation check run is completed before any target check run is
    /// created. All builds go out in one batch call.
    pub async fn trigger_presubmit_targets(
        &self,
        branch: &str,
        pr_number: u64,
        slug: &RepositorySlug,
        commit_sha: &str,
    ) -> Result<PresubmitOutcome> {
        let validation = self
            .checks
            .create_check_run(slug, CONFIG_VALIDATION_CHECK, commit_sha)
            .await?;

        let config = match self.resolver.resolve(slug, commit_sha).await {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                let message = e.to_string();
                warn!(repo = %slug, pr = pr_number, sha = commit_sha, error = %message, "Invalid configuration");
                self.fail_check_run(slug, &validation, "Invalid configuration", &message)
                    .await?;
                return Ok(PresubmitOutcome::InvalidConfig(message));
            }
            Err(e) => {
                error!(repo = %slug, pr = pr_number, sha = commit_sha, error = %e, "Failed to load configuration");
                if let Err(update_err) = self
                    .fail_check_run(slug, &validation, "Configuration unavailable", &e.to_string())
                    .await
                {
                    warn!(error = %update_err, "Failed to report configuration error");
                }
                return Err(e);
            }
        };

        self.checks
            .update_check_run(
                slug,
                &validation,
                CheckRunUpdate::completed(CheckConclusion::Success),
            )
            .await?;

        let targets = presubmit_targets(&config, branch, self.legacy_presubmit(slug));

        let mut check_runs = Vec::with_capacity(targets.len());
        let mut requests = Vec::with_capacity(targets.len());
        for target in &targets {
            let check_run = self
                .checks
                .create_check_run(slug, &target.name, commit_sha)
                .await?;
            requests.push(presubmit_request(
                slug,
                Some(pr_number),
                commit_sha,
                check_run.id,
                target,
            ));
            check_runs.push(check_run);
        }

        let results = self.schedule_batch(requests).await?;

        let mut scheduled = Vec::with_capacity(results.len());
        for (check_run, result) in check_runs.iter().zip(results) {
            match result {
                Ok(build) => scheduled.push(ScheduledTarget::from_build(&build, Some(check_run.id))),
                Err(message) => {
                    warn!(repo = %slug, pr = pr_number, target = %check_run.name, error = %message, "Failed to schedule build");
                    self.fail_check_run(slug, check_run, "Build could not be scheduled", &message)
                        .await?;
                }
            }
        }

        info!(
            repo = %slug,
            pr = pr_number,
            sha = commit_sha,
            scheduled = scheduled.len(),
            "Triggered presubmit targets"
        );
        Ok(PresubmitOutcome::Triggered(scheduled))
    }

    async fn fail_check_run(
        &self,
        slug: &RepositorySlug,
        check_run: &CheckRun,
        title: &str,
        message: &str,
    ) -> Result<()> {
        let update = CheckRunUpdate::completed(CheckConclusion::Failure).with_output(
            CheckRunOutput {
                title: title.to_string(),
                summary: message.to_string(),
                text: None,
            },
        );
        self.checks.update_check_run(slug, check_run, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeFetcher, Harness, VALID_CONFIG, engine};
    use conductor_core::Error;
    use conductor_core::builds::tags;
    use conductor_core::checks::CheckStatus;
    use std::sync::atomic::Ordering;

    const INVALID_CONFIG: &str = r#"
        enabled_branches "main"
        target "A" dependencies="B"
    "#;

    fn head_commit() -> Commit {
        Commit {
            repository: engine(),
            branch: "main".to_string(),
            sha: "abc".to_string(),
            author: "octocat".to_string(),
            author_avatar_url: String::new(),
            message: "msg".to_string(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_get_presubmit_targets() {
        let h = Harness::with_legacy(FakeFetcher::with_config(VALID_CONFIG), &["Legacy"], &[]);

        let targets = h
            .scheduler
            .get_presubmit_targets(&head_commit(), 42)
            .await
            .unwrap()
            .unwrap();

        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Legacy", "linux_build", "linux_test"]);
        assert!(h.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_presubmit_targets_reports_invalid_config() {
        let h = Harness::new(FakeFetcher::with_config(INVALID_CONFIG));

        let result = h
            .scheduler
            .get_presubmit_targets(&head_commit(), 42)
            .await
            .unwrap();

        assert_eq!(
            result.unwrap_err().to_string(),
            "A depends on B which does not exist"
        );
    }

    #[tokio::test]
    async fn test_invalid_config_fails_validation_check() {
        let h = Harness::new(FakeFetcher::with_config(INVALID_CONFIG));

        let outcome = h
            .scheduler
            .trigger_presubmit_targets("main", 42, &engine(), "abc")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PresubmitOutcome::InvalidConfig("A depends on B which does not exist".to_string())
        );

        let update = h.checks.update_for(CONFIG_VALIDATION_CHECK).unwrap();
        assert_eq!(update.status, CheckStatus::Completed);
        assert_eq!(update.conclusion, Some(CheckConclusion::Failure));
        assert_eq!(
            update.output.unwrap().summary,
            "A depends on B which does not exist"
        );

        assert_eq!(h.checks.created_names(), vec![CONFIG_VALIDATION_CHECK]);
        assert_eq!(h.builds.batch_calls.load(Ordering::SeqCst), 0);
        assert!(h.builds.scheduled_builders().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_validation_check_and_propagates() {
        let h = Harness::new(FakeFetcher::failing());

        let err = h
            .scheduler
            .trigger_presubmit_targets("main", 42, &engine(), "abc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        let update = h.checks.update_for(CONFIG_VALIDATION_CHECK).unwrap();
        assert_eq!(update.conclusion, Some(CheckConclusion::Failure));
        assert!(h.builds.scheduled_builders().is_empty());
    }

    #[tokio::test]
    async fn test_valid_config_schedules_targets_in_order() {
        let h = Harness::with_legacy(FakeFetcher::with_config(VALID_CONFIG), &["Legacy"], &[]);

        let outcome = h
            .scheduler
            .trigger_presubmit_targets("main", 42, &engine(), "abc")
            .await
            .unwrap();

        let PresubmitOutcome::Triggered(scheduled) = outcome else {
            panic!("expected builds to be triggered");
        };
        let names: Vec<&str> = scheduled.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Legacy", "linux_build", "linux_test"]);

        assert_eq!(
            h.calls(),
            vec![
                "create:config validation",
                "update:config validation:success",
                "create:Legacy",
                "create:linux_build",
                "create:linux_test",
                "batch:3",
            ]
        );
        assert_eq!(
            h.builds.scheduled_builders(),
            vec!["Legacy", "Linux build", "linux_test"]
        );
    }

    #[tokio::test]
    async fn test_builds_are_linked_to_their_check_runs() {
        let h = Harness::new(FakeFetcher::with_config(VALID_CONFIG));

        let outcome = h
            .scheduler
            .trigger_presubmit_targets("main", 42, &engine(), "abc")
            .await
            .unwrap();

        let PresubmitOutcome::Triggered(scheduled) = outcome else {
            panic!("expected builds to be triggered");
        };
        let created = h.checks.created.lock().unwrap().clone();
        let requests = h.builds.scheduled.lock().unwrap().clone();

        for (target, request) in scheduled.iter().zip(&requests) {
            let check_run = created.iter().find(|r| r.name == target.name).unwrap();
            assert_eq!(target.check_run_id, Some(check_run.id));
            assert_eq!(
                request.tags.get(tags::GITHUB_CHECKRUN),
                Some(check_run.id.to_string().as_str())
            );
            assert!(request.tags.contains(tags::BUILDSET, "pr/git/42"));
            assert!(request.tags.contains(tags::BUILDSET, "sha/git/abc"));
        }
    }

    #[tokio::test]
    async fn test_rejected_build_fails_its_check_run() {
        let h = Harness::new(FakeFetcher::with_config(VALID_CONFIG));
        h.builds
            .rejected_builders
            .lock()
            .unwrap()
            .insert("linux_test".to_string());

        let outcome = h
            .scheduler
            .trigger_presubmit_targets("main", 42, &engine(), "abc")
            .await
            .unwrap();

        let PresubmitOutcome::Triggered(scheduled) = outcome else {
            panic!("expected builds to be triggered");
        };
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].name, "linux_build");

        let update = h.checks.update_for("linux_test").unwrap();
        assert_eq!(update.conclusion, Some(CheckConclusion::Failure));
    }

    #[tokio::test]
    async fn test_unavailable_build_backend_propagates() {
        let h = Harness::with_unavailable_builds(FakeFetcher::with_config(VALID_CONFIG));

        let err = h
            .scheduler
            .trigger_presubmit_targets("main", 42, &engine(), "abc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Backend(_)));
    }

    #[tokio::test]
    async fn test_no_matching_targets_skips_batch() {
        let h = Harness::new(FakeFetcher::with_config(VALID_CONFIG));

        let outcome = h
            .scheduler
            .trigger_presubmit_targets("feature", 42, &engine(), "abc")
            .await
            .unwrap();

        assert_eq!(outcome, PresubmitOutcome::Triggered(Vec::new()));
        assert_eq!(h.builds.batch_calls.load(Ordering::SeqCst), 0);
    }
}

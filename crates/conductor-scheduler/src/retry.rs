//! Retries of failed presubmit builds.

use conductor_config::Target;
use conductor_core::builds::{
    BatchRequest, BatchResponse, BuildPredicate, BuildTags, latest_by_target, tags,
};
use conductor_core::checks::{CONFIG_VALIDATION_CHECK, CheckRunId};
use conductor_core::events::{CheckRunAction, CheckRunEvent, CheckSuiteAction, CheckSuiteEvent};
use conductor_core::{Error, RepositorySlug, Result};
use tracing::{debug, info, warn};

use crate::Scheduler;
use crate::scheduler::{ScheduledTarget, presubmit_request};

impl Scheduler {
    /// Reschedule the build behind a re-requested check run.
    ///
    /// Returns `false` for any other action. The most recent build of the
    /// check run's target on the same commit is rescheduled with its builder,
    /// tags and inputs. Without one, the target is looked up in the commit's
    /// configuration; names it does not declare are legacy builders.
    pub async fn process_check_run(&self, event: &CheckRunEvent) -> Result<bool> {
        if event.action != CheckRunAction::Rerequested {
            return Ok(false);
        }

        let slug = event.repository.slug()?;
        if !self.system.is_supported(&slug) {
            debug!(repo = %slug, "Ignoring check run of unsupported repository");
            return Ok(false);
        }

        let check_run = &event.check_run;
        let check_run_id = CheckRunId(check_run.id);
        let predicate = BuildPredicate {
            builder: None,
            tags: BuildTags::new()
                .with(tags::TARGET, &check_run.name)
                .with(tags::BUILDSET, tags::commit_buildset(&check_run.head_sha)),
        };
        let previous = latest_by_target(self.builds.search_builds(predicate).await?)
            .remove(&check_run.name);

        let request = match previous {
            Some(build) => build.rerun_request(check_run_id),
            None => {
                let target = match self.resolver.resolve(&slug, &check_run.head_sha).await? {
                    Ok(config) => config.target(&check_run.name).cloned(),
                    Err(e) => {
                        warn!(repo = %slug, sha = %check_run.head_sha, error = %e, "Invalid configuration");
                        None
                    }
                };
                let target = target.unwrap_or_else(|| Target::legacy(&check_run.name));
                let pr_number = check_run.pull_requests.first().map(|pr| pr.number);
                presubmit_request(&slug, pr_number, &check_run.head_sha, check_run_id, &target)
            }
        };

        let build = self.builds.schedule_build(request).await?;
        info!(
            repo = %slug,
            check_run = %check_run_id,
            target = %check_run.name,
            build_id = %build.id,
            "Rescheduled check run"
        );
        Ok(true)
    }

    /// Schedule a new build for every target of a pull request whose most
    /// recent build failed.
    ///
    /// Targets with no build, or whose latest build succeeded or is still
    /// running, are left alone. Check runs are not modified.
    pub async fn retry_presubmit_targets(
        &self,
        pr_number: u64,
        slug: &RepositorySlug,
        commit_sha: &str,
        event: &CheckSuiteEvent,
    ) -> Result<Vec<ScheduledTarget>> {
        if event.action != CheckSuiteAction::Rerequested {
            return Ok(Vec::new());
        }

        let check_runs = self.checks.list_check_runs(slug, commit_sha).await?;

        let search = BatchRequest::Search(BuildPredicate {
            builder: None,
            tags: BuildTags::new().with(tags::BUILDSET, tags::pull_request_buildset(pr_number)),
        });
        let builds = match self.builds.batch(vec![search]).await?.into_iter().next() {
            Some(BatchResponse::Found(builds)) => builds,
            Some(BatchResponse::Error { message }) => return Err(Error::Backend(message)),
            _ => {
                return Err(Error::Backend(
                    "build search returned no results".to_string(),
                ));
            }
        };
        let latest = latest_by_target(builds);

        let mut names: Vec<&String> = check_runs.keys().collect();
        names.sort();

        let mut check_run_ids = Vec::new();
        let mut requests = Vec::new();
        for name in names {
            if name == CONFIG_VALIDATION_CHECK {
                continue;
            }
            let Some(build) = latest.get(name.as_str()) else {
                continue;
            };
            if !build.status.is_failure() {
                continue;
            }

            let check_run_id = check_runs[name].id;
            requests.push(build.rerun_request(check_run_id));
            check_run_ids.push(check_run_id);
        }

        let results = self.schedule_batch(requests).await?;

        let mut scheduled = Vec::with_capacity(results.len());
        for (check_run_id, result) in check_run_ids.into_iter().zip(results) {
            match result {
                Ok(build) => scheduled.push(ScheduledTarget::from_build(&build, Some(check_run_id))),
                Err(message) => {
                    warn!(repo = %slug, pr = pr_number, check_run = %check_run_id, error = %message, "Failed to reschedule build");
                }
            }
        }

        info!(
            repo = %slug,
            pr = pr_number,
            sha = commit_sha,
            retried = scheduled.len(),
            "Retried failed presubmit targets"
        );
        Ok(scheduled)
    }
}

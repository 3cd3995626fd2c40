//! Webhook endpoint for GitHub deliveries.
//!
//! Deliveries are not signature-checked; the endpoint is expected to sit
//! behind infrastructure that handles authentication.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use conductor_core::events::{
    CheckSuiteEvent, EventError, PullRequestAction, PullRequestEvent, WebhookEvent,
};
use conductor_scheduler::Scheduler;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let kind = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = match WebhookEvent::decode(kind, &body) {
        Ok(event) => event,
        Err(EventError::UnsupportedKind(kind)) => {
            debug!(event = %kind, delivery, "Ignoring unsupported webhook");
            return Ok(Json(json!({ "event": kind, "handled": false })));
        }
        Err(e) => {
            warn!(event = %kind, delivery, error = %e, "Rejected webhook payload");
            return Err(e.into());
        }
    };

    info!(event = event.kind(), delivery, "Received GitHub webhook");
    let result = dispatch(&state.scheduler, event).await?;
    Ok(Json(result))
}

async fn dispatch(scheduler: &Scheduler, event: WebhookEvent) -> Result<Value, ApiError> {
    match event {
        WebhookEvent::Ping => Ok(json!({ "event": "ping", "handled": true })),
        WebhookEvent::Push(push) => {
            let commits = push.commit_events()?;
            let inserted = scheduler.add_commits(commits).await?;
            Ok(json!({
                "event": "push",
                "handled": true,
                "inserted": inserted.iter().map(|c| c.sha.as_str()).collect::<Vec<_>>(),
            }))
        }
        WebhookEvent::PullRequest(event) => handle_pull_request(scheduler, *event).await,
        WebhookEvent::CheckRun(event) => {
            let rescheduled = scheduler.process_check_run(&event).await?;
            Ok(json!({ "event": "check_run", "handled": rescheduled }))
        }
        WebhookEvent::CheckSuite(event) => handle_check_suite(scheduler, &event).await,
    }
}

async fn handle_pull_request(
    scheduler: &Scheduler,
    event: PullRequestEvent,
) -> Result<Value, ApiError> {
    let pr = &event.pull_request;
    let slug = pr.slug()?;
    if !scheduler.system().is_supported(&slug) {
        debug!(repo = %slug, pr = event.number, "Ignoring pull request of unsupported repository");
        return Ok(json!({ "event": "pull_request", "handled": false }));
    }

    match event.action {
        PullRequestAction::Opened | PullRequestAction::Reopened | PullRequestAction::Synchronize => {
            let outcome = scheduler
                .trigger_presubmit_targets(&pr.base.git_ref, event.number, &slug, &pr.head.sha)
                .await?;
            Ok(json!({ "event": "pull_request", "handled": true, "presubmit": outcome }))
        }
        PullRequestAction::Closed if pr.merged => {
            let commit = scheduler.add_pull_request(pr).await?;
            Ok(json!({
                "event": "pull_request",
                "handled": true,
                "inserted": commit.map(|c| c.sha),
            }))
        }
        action => {
            debug!(pr = event.number, ?action, "Ignoring pull request action");
            Ok(json!({ "event": "pull_request", "handled": false }))
        }
    }
}

async fn handle_check_suite(
    scheduler: &Scheduler,
    event: &CheckSuiteEvent,
) -> Result<Value, ApiError> {
    let slug = event.repository.slug()?;
    if !scheduler.system().is_supported(&slug) {
        debug!(repo = %slug, "Ignoring check suite of unsupported repository");
        return Ok(json!({ "event": "check_suite", "handled": false }));
    }

    let mut retried = Vec::new();
    for pr in &event.check_suite.pull_requests {
        let scheduled = scheduler
            .retry_presubmit_targets(pr.number, &slug, &event.check_suite.head_sha, event)
            .await?;
        retried.extend(scheduled);
    }

    Ok(json!({ "event": "check_suite", "handled": true, "retried": retried }))
}

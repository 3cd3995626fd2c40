//! GitHub API client for check runs and configuration fetches.

use async_trait::async_trait;
use conductor_core::checks::{CheckRun, CheckRunOutput, CheckRunUpdate, CheckService, CheckStatus};
use conductor_core::events::CheckRunPayload;
use conductor_core::fetch::ConfigFetcher;
use conductor_core::{Error, RepositorySlug, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const USER_AGENT: &str = "conductor";
const PAGE_SIZE: usize = 100;

/// GitHub API client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
    config_path: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        access_token: Option<String>,
        config_path: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token,
            config_path: config_path.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_accepting(method, path, "application/vnd.github+json")
    }

    fn request_accepting(&self, method: Method, path: &str, accept: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .header("User-Agent", USER_AGENT)
            .header("Accept", accept);

        match &self.access_token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Send a request and decode a JSON response.
    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
        action: &str,
    ) -> std::result::Result<T, GitHubError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::from_status(status, action, text));
        }

        response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))
    }

    /// Raw contents of `path` at `git_ref`.
    pub async fn get_contents(
        &self,
        slug: &RepositorySlug,
        path: &str,
        git_ref: &str,
    ) -> std::result::Result<Vec<u8>, GitHubError> {
        let url = format!(
            "/repos/{}/{}/contents/{}?ref={}",
            slug.owner,
            slug.name,
            encode_path(path),
            urlencoding::encode(git_ref)
        );

        let response = self
            .request_accepting(Method::GET, &url, "application/vnd.github.raw")
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::from_status(
                status,
                &format!("fetch {} at {}", path, git_ref),
                text,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl CheckService for GitHubClient {
    async fn create_check_run(
        &self,
        slug: &RepositorySlug,
        name: &str,
        head_sha: &str,
    ) -> Result<CheckRun> {
        let url = format!("/repos/{}/{}/check-runs", slug.owner, slug.name);
        let payload = CreateCheckRun {
            name,
            head_sha,
            status: CheckStatus::Queued,
        };

        let run: CheckRunPayload = self
            .send_json(self.request(Method::POST, &url).json(&payload), "create check run")
            .await?;
        debug!(repo = %slug, check_run = run.id, name, "Created check run");
        Ok(run.to_check_run())
    }

    async fn update_check_run(
        &self,
        slug: &RepositorySlug,
        check_run: &CheckRun,
        update: CheckRunUpdate,
    ) -> Result<()> {
        let url = format!(
            "/repos/{}/{}/check-runs/{}",
            slug.owner, slug.name, check_run.id
        );
        let payload = UpdateCheckRun::from(&update);

        let _: CheckRunPayload = self
            .send_json(self.request(Method::PATCH, &url).json(&payload), "update check run")
            .await?;
        Ok(())
    }

    async fn list_check_runs(
        &self,
        slug: &RepositorySlug,
        head_sha: &str,
    ) -> Result<HashMap<String, CheckRun>> {
        let mut runs = HashMap::new();
        let mut page = 1;

        loop {
            let url = format!(
                "/repos/{}/{}/commits/{}/check-runs?per_page={}&page={}",
                slug.owner, slug.name, head_sha, PAGE_SIZE, page
            );
            let list: CheckRunList = self
                .send_json(self.request(Method::GET, &url), "list check runs")
                .await?;

            let received = list.check_runs.len();
            for run in list.check_runs {
                runs.insert(run.name.clone(), run.to_check_run());
            }

            if received < PAGE_SIZE || page * PAGE_SIZE >= list.total_count {
                break;
            }
            page += 1;
        }

        Ok(runs)
    }
}

#[async_trait]
impl ConfigFetcher for GitHubClient {
    async fn fetch_config(&self, slug: &RepositorySlug, git_ref: &str) -> Result<Vec<u8>> {
        self.get_contents(slug, &self.config_path, git_ref)
            .await
            .map_err(|e| match e {
                GitHubError::NotFound(msg) => Error::NotFound(msg),
                other => Error::Fetch(other.to_string()),
            })
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Serialize)]
struct CreateCheckRun<'a> {
    name: &'a str,
    head_sha: &'a str,
    status: CheckStatus,
}

#[derive(Debug, Serialize)]
struct UpdateCheckRun<'a> {
    status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<conductor_core::checks::CheckConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a CheckRunOutput>,
}

impl<'a> From<&'a CheckRunUpdate> for UpdateCheckRun<'a> {
    fn from(update: &'a CheckRunUpdate) -> Self {
        Self {
            status: update.status,
            conclusion: update.conclusion,
            output: update.output.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunList {
    total_count: usize,
    check_runs: Vec<CheckRunPayload>,
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GitHubError {
    fn from_status(status: StatusCode, action: &str, body: String) -> Self {
        if status == StatusCode::NOT_FOUND {
            GitHubError::NotFound(format!("{}: {}", action, body))
        } else {
            GitHubError::Api(format!("Failed to {} ({}): {}", action, status, body))
        }
    }
}

impl From<GitHubError> for Error {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::NotFound(msg) => Error::NotFound(msg),
            other => Error::Backend(other.to_string()),
        }
    }
}

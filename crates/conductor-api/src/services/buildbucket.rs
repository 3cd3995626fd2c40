//! Buildbucket client over the pRPC JSON API.
//!
//! Requests are `POST {host}/prpc/buildbucket.v2.Builds/{Method}` with JSON
//! bodies. Responses are JSON prefixed with `)]}'`, which is stripped before
//! decoding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::builds::{
    BatchRequest, BatchResponse, Build, BuildId, BuildPredicate, BuildService, BuildStatus,
    BuildTags, ScheduleBuildRequest,
};
use conductor_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

const XSSI_PREFIX: &str = ")]}'";
const SERVICE: &str = "buildbucket.v2.Builds";
const BUILD_FIELDS: &[&str] = &[
    "id",
    "builder",
    "status",
    "tags",
    "createTime",
    "input.properties",
    "executionTimeout",
];

/// Buildbucket API client.
pub struct BuildbucketClient {
    client: reqwest::Client,
    host: String,
    project: String,
    bucket: String,
    access_token: Option<String>,
}

impl BuildbucketClient {
    pub fn new(
        host: impl Into<String>,
        project: impl Into<String>,
        bucket: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            project: project.into(),
            bucket: bucket.into(),
            access_token,
        }
    }

    async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/prpc/{}/{}", self.host, SERVICE, method);
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(request);
        if let Some(token) = &self.access_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Backend(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Backend(format!("{} response unreadable: {}", method, e)))?;
        if !status.is_success() {
            return Err(Error::Backend(format!(
                "{} failed ({}): {}",
                method,
                status,
                strip_prefix(&text).trim()
            )));
        }

        serde_json::from_str(strip_prefix(&text))
            .map_err(|e| Error::Backend(format!("{} response invalid: {}", method, e)))
    }

    fn builder_id(&self, builder: &str) -> BuilderId {
        BuilderId {
            project: self.project.clone(),
            bucket: self.bucket.clone(),
            builder: builder.to_string(),
        }
    }

    fn schedule_request(&self, request: ScheduleBuildRequest) -> WireScheduleRequest {
        WireScheduleRequest {
            builder: self.builder_id(&request.builder),
            tags: wire_tags(&request.tags),
            properties: request.properties,
            execution_timeout: request
                .timeout_minutes
                .map(|m| format!("{}s", u64::from(m) * 60)),
            fields: BUILD_FIELDS.join(","),
        }
    }

    fn search_request(&self, predicate: BuildPredicate, page_token: Option<String>) -> WireSearchRequest {
        WireSearchRequest {
            predicate: WirePredicate {
                builder: predicate.builder.as_deref().map(|b| self.builder_id(b)),
                tags: wire_tags(&predicate.tags),
            },
            fields: search_fields(),
            page_token,
        }
    }
}

#[async_trait]
impl BuildService for BuildbucketClient {
    async fn schedule_build(&self, request: ScheduleBuildRequest) -> Result<Build> {
        let wire: WireBuild = self
            .call("ScheduleBuild", &self.schedule_request(request))
            .await?;
        let build = wire.into_build()?;
        debug!(build_id = %build.id, builder = %build.builder, "Scheduled build");
        Ok(build)
    }

    async fn search_builds(&self, predicate: BuildPredicate) -> Result<Vec<Build>> {
        let mut builds = Vec::new();
        let mut page_token = None;

        loop {
            let response: WireSearchResponse = self
                .call("SearchBuilds", &self.search_request(predicate.clone(), page_token))
                .await?;
            for wire in response.builds {
                builds.push(wire.into_build()?);
            }
            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(builds)
    }

    async fn batch(&self, requests: Vec<BatchRequest>) -> Result<Vec<BatchResponse>> {
        let wire = WireBatchRequest {
            requests: requests
                .into_iter()
                .map(|request| match request {
                    BatchRequest::Schedule(r) => WireBatchItem::ScheduleBuild(self.schedule_request(r)),
                    BatchRequest::Search(p) => WireBatchItem::SearchBuilds(self.search_request(p, None)),
                })
                .collect(),
        };

        let response: WireBatchResponse = self.call("Batch", &wire).await?;
        response
            .responses
            .into_iter()
            .map(WireBatchResult::into_response)
            .collect()
    }
}

fn search_fields() -> String {
    BUILD_FIELDS
        .iter()
        .map(|field| format!("builds.*.{}", field))
        .chain(std::iter::once("nextPageToken".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whole minutes of a proto JSON duration such as `"1800s"`, rounded up.
fn duration_minutes(duration: &str) -> Result<u32> {
    let seconds: f64 = duration
        .strip_suffix('s')
        .and_then(|s| s.parse().ok())
        .filter(|s: &f64| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| Error::Backend(format!("invalid duration '{}'", duration)))?;
    u32::try_from((seconds / 60.0).ceil() as u64)
        .map_err(|_| Error::Backend(format!("duration '{}' out of range", duration)))
}

fn strip_prefix(body: &str) -> &str {
    body.strip_prefix(XSSI_PREFIX).unwrap_or(body)
}

fn wire_tags(build_tags: &BuildTags) -> Vec<StringPair> {
    build_tags
        .iter()
        .map(|(key, value)| StringPair {
            key: key.to_string(),
            value: value.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BuilderId {
    project: String,
    bucket: String,
    builder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StringPair {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireScheduleRequest {
    builder: BuilderId,
    tags: Vec<StringPair>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    properties: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_timeout: Option<String>,
    fields: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePredicate {
    #[serde(skip_serializing_if = "Option::is_none")]
    builder: Option<BuilderId>,
    tags: Vec<StringPair>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSearchRequest {
    predicate: WirePredicate,
    fields: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSearchResponse {
    #[serde(default)]
    builds: Vec<WireBuild>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum WireBatchItem {
    ScheduleBuild(WireScheduleRequest),
    SearchBuilds(WireSearchRequest),
}

#[derive(Debug, Serialize)]
struct WireBatchRequest {
    requests: Vec<WireBatchItem>,
}

#[derive(Debug, Deserialize)]
struct WireBatchResponse {
    #[serde(default)]
    responses: Vec<WireBatchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum WireBatchResult {
    ScheduleBuild(WireBuild),
    SearchBuilds(WireSearchResponse),
    Error(WireStatus),
}

impl WireBatchResult {
    fn into_response(self) -> Result<BatchResponse> {
        Ok(match self {
            WireBatchResult::ScheduleBuild(build) => BatchResponse::Scheduled(build.into_build()?),
            WireBatchResult::SearchBuilds(search) => BatchResponse::Found(
                search
                    .builds
                    .into_iter()
                    .map(WireBuild::into_build)
                    .collect::<Result<_>>()?,
            ),
            WireBatchResult::Error(status) => BatchResponse::Error {
                message: status.message,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBuild {
    /// int64 ids are strings in proto JSON.
    id: String,
    builder: BuilderId,
    status: BuildStatus,
    #[serde(default)]
    tags: Vec<StringPair>,
    create_time: DateTime<Utc>,
    #[serde(default)]
    input: WireInput,
    #[serde(default)]
    execution_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireInput {
    #[serde(default)]
    properties: HashMap<String, Value>,
}

impl WireBuild {
    fn into_build(self) -> Result<Build> {
        let id = self
            .id
            .parse()
            .map_err(|_| Error::Backend(format!("invalid build id '{}'", self.id)))?;
        let timeout_minutes = self
            .execution_timeout
            .as_deref()
            .map(duration_minutes)
            .transpose()?;

        Ok(Build {
            id: BuildId(id),
            builder: self.builder.builder,
            status: self.status,
            tags: self.tags.into_iter().map(|p| (p.key, p.value)).collect(),
            create_time: self.create_time,
            properties: self.input.properties,
            timeout_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::builds::tags;
    use serde_json::json;

    fn client() -> BuildbucketClient {
        BuildbucketClient::new("https://bb.example.com/", "engine", "try", None)
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix(")]}'\n{\"a\":1}").trim(), "{\"a\":1}");
        assert_eq!(strip_prefix("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_schedule_request_shape() {
        let request = ScheduleBuildRequest {
            builder: "Linux test".to_string(),
            tags: BuildTags::new()
                .with(tags::BUILDSET, "pr/git/42")
                .with(tags::TARGET, "linux_test"),
            properties: HashMap::from([("shard".to_string(), json!("1"))]),
            timeout_minutes: Some(30),
        };

        let wire = serde_json::to_value(client().schedule_request(request)).unwrap();
        assert_eq!(
            wire,
            json!({
                "builder": { "project": "engine", "bucket": "try", "builder": "Linux test" },
                "tags": [
                    { "key": "buildset", "value": "pr/git/42" },
                    { "key": "target", "value": "linux_test" }
                ],
                "properties": { "shard": "1" },
                "executionTimeout": "1800s",
                "fields": "id,builder,status,tags,createTime,input.properties,executionTimeout"
            })
        );
    }

    #[test]
    fn test_batch_request_shape() {
        let c = client();
        let wire = WireBatchRequest {
            requests: vec![WireBatchItem::SearchBuilds(c.search_request(
                BuildPredicate {
                    builder: None,
                    tags: BuildTags::new().with(tags::BUILDSET, "pr/git/42"),
                },
                None,
            ))],
        };

        let value = serde_json::to_value(wire).unwrap();
        let search = &value["requests"][0]["searchBuilds"];
        assert_eq!(search["predicate"]["tags"][0]["value"], "pr/git/42");
        assert!(search["predicate"].get("builder").is_none());
        assert!(
            search["fields"]
                .as_str()
                .unwrap()
                .contains("builds.*.input.properties,builds.*.executionTimeout")
        );
    }

    #[test]
    fn test_build_inputs_decoding() {
        let wire: WireBuild = serde_json::from_value(json!({
            "id": "17",
            "builder": {"project": "engine", "bucket": "try", "builder": "Linux"},
            "status": "FAILURE",
            "tags": [{"key": "target", "value": "linux"}],
            "createTime": "2024-01-01T00:00:00Z",
            "input": {"properties": {"shard": "1", "gpu": true}},
            "executionTimeout": "3600s"
        }))
        .unwrap();

        let build = wire.into_build().unwrap();
        assert_eq!(build.properties.get("shard"), Some(&json!("1")));
        assert_eq!(build.properties.get("gpu"), Some(&json!(true)));
        assert_eq!(build.timeout_minutes, Some(60));
    }

    #[test]
    fn test_duration_minutes() {
        assert_eq!(duration_minutes("1800s").unwrap(), 30);
        assert_eq!(duration_minutes("90.5s").unwrap(), 2);
        assert!(matches!(duration_minutes("30m"), Err(Error::Backend(_))));
    }

    #[test]
    fn test_batch_response_decoding() {
        let body = r#")]}'
        {
            "responses": [
                {"scheduleBuild": {
                    "id": "8945511751514863184",
                    "builder": {"project": "engine", "bucket": "try", "builder": "Linux"},
                    "status": "SCHEDULED",
                    "tags": [{"key": "target", "value": "linux"}],
                    "createTime": "2024-01-01T00:00:00Z"
                }},
                {"searchBuilds": {"builds": []}},
                {"error": {"code": 5, "message": "builder not found"}}
            ]
        }"#;

        let response: WireBatchResponse = serde_json::from_str(strip_prefix(body)).unwrap();
        let responses: Vec<BatchResponse> = response
            .responses
            .into_iter()
            .map(WireBatchResult::into_response)
            .collect::<Result<_>>()
            .unwrap();

        match &responses[0] {
            BatchResponse::Scheduled(build) => {
                assert_eq!(build.id, BuildId(8945511751514863184));
                assert_eq!(build.target_name(), "linux");
                assert_eq!(build.status, BuildStatus::Scheduled);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(responses[1], BatchResponse::Found(Vec::new()));
        assert_eq!(
            responses[2],
            BatchResponse::Error {
                message: "builder not found".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_build_id() {
        let wire: WireBuild = serde_json::from_value(json!({
            "id": "not-a-number",
            "builder": {"project": "engine", "bucket": "try", "builder": "Linux"},
            "status": "FAILURE",
            "createTime": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert!(matches!(wire.into_build(), Err(Error::Backend(_))));
    }
}

//! In-memory collaborators for scheduler tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use conductor_core::builds::{
    BatchRequest, BatchResponse, Build, BuildId, BuildPredicate, BuildService, BuildStatus,
    BuildTags, ScheduleBuildRequest,
};
use conductor_core::checks::{CheckRun, CheckRunId, CheckRunUpdate, CheckService, CheckStatus};
use conductor_core::datastore::Datastore;
use conductor_core::fetch::ConfigFetcher;
use conductor_core::{Commit, CommitKey, Error, RepositorySlug, Result, Task};
use conductor_db::MemoryDatastore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Three targets: two presubmit, three postsubmit, all on `main`.
pub const VALID_CONFIG: &str = r#"
enabled_branches "main"

target "linux_build" builder="Linux build"
target "linux_test" dependencies="linux_build"
target "mac_build" presubmit=#false
"#;

/// Ordered record of backend calls shared between fakes.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct FakeFetcher {
    default: Option<Vec<u8>>,
    per_ref: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl FakeFetcher {
    pub fn with_config(text: &str) -> Self {
        Self::with_bytes(text.as_bytes().to_vec())
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            default: Some(bytes),
            per_ref: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            default: None,
            per_ref: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_for_ref(&self, git_ref: &str, text: &str) {
        self.per_ref
            .lock()
            .unwrap()
            .insert(git_ref.to_string(), text.as_bytes().to_vec());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigFetcher for FakeFetcher {
    async fn fetch_config(&self, slug: &RepositorySlug, git_ref: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(bytes) = self.per_ref.lock().unwrap().get(git_ref) {
            return Ok(bytes.clone());
        }
        self.default
            .clone()
            .ok_or_else(|| Error::Fetch(format!("{} at {}: connection refused", slug, git_ref)))
    }
}

#[derive(Default)]
pub struct FakeCheckService {
    next_id: AtomicI64,
    pub log: CallLog,
    pub created: Mutex<Vec<CheckRun>>,
    pub updates: Mutex<Vec<(CheckRun, CheckRunUpdate)>>,
    /// Returned by `list_check_runs` in addition to created runs.
    pub existing: Mutex<Vec<CheckRun>>,
}

impl FakeCheckService {
    pub fn new(log: CallLog) -> Self {
        Self {
            next_id: AtomicI64::new(100),
            log,
            ..Default::default()
        }
    }

    pub fn add_existing(&self, id: i64, name: &str, head_sha: &str) {
        self.existing.lock().unwrap().push(CheckRun {
            id: CheckRunId(id),
            name: name.to_string(),
            head_sha: head_sha.to_string(),
            status: CheckStatus::Completed,
            conclusion: None,
            check_suite_id: None,
        });
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn update_for(&self, name: &str) -> Option<CheckRunUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(run, _)| run.name == name)
            .map(|(_, update)| update.clone())
    }
}

#[async_trait]
impl CheckService for FakeCheckService {
    async fn create_check_run(
        &self,
        _slug: &RepositorySlug,
        name: &str,
        head_sha: &str,
    ) -> Result<CheckRun> {
        let run = CheckRun {
            id: CheckRunId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: name.to_string(),
            head_sha: head_sha.to_string(),
            status: CheckStatus::Queued,
            conclusion: None,
            check_suite_id: None,
        };
        self.log.lock().unwrap().push(format!("create:{}", name));
        self.created.lock().unwrap().push(run.clone());
        Ok(run)
    }

    async fn update_check_run(
        &self,
        _slug: &RepositorySlug,
        check_run: &CheckRun,
        update: CheckRunUpdate,
    ) -> Result<()> {
        let conclusion = update
            .conclusion
            .map(|c| format!("{:?}", c).to_lowercase())
            .unwrap_or_default();
        self.log
            .lock()
            .unwrap()
            .push(format!("update:{}:{}", check_run.name, conclusion));
        self.updates
            .lock()
            .unwrap()
            .push((check_run.clone(), update));
        Ok(())
    }

    async fn list_check_runs(
        &self,
        _slug: &RepositorySlug,
        head_sha: &str,
    ) -> Result<HashMap<String, CheckRun>> {
        let existing = self.existing.lock().unwrap();
        let created = self.created.lock().unwrap();
        Ok(existing
            .iter()
            .chain(created.iter())
            .filter(|r| r.head_sha == head_sha)
            .map(|r| (r.name.clone(), r.clone()))
            .collect())
    }
}

#[derive(Default)]
pub struct FakeBuildService {
    next_id: AtomicI64,
    pub log: CallLog,
    /// Builds known to the backend; searched by predicates.
    pub builds: Mutex<Vec<Build>>,
    pub scheduled: Mutex<Vec<ScheduleBuildRequest>>,
    pub batch_calls: AtomicUsize,
    /// Builders whose schedule requests fail inside a batch.
    pub rejected_builders: Mutex<HashSet<String>>,
    pub unavailable: bool,
}

impl FakeBuildService {
    pub fn new(log: CallLog) -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            log,
            ..Default::default()
        }
    }

    pub fn unavailable(log: CallLog) -> Self {
        Self {
            unavailable: true,
            ..Self::new(log)
        }
    }

    pub fn add_build(&self, id: i64, builder: &str, status: BuildStatus, secs: i64, tags: BuildTags) {
        self.builds.lock().unwrap().push(Build {
            id: BuildId(id),
            builder: builder.to_string(),
            status,
            tags,
            create_time: Utc.timestamp_opt(secs, 0).unwrap(),
            properties: HashMap::new(),
            timeout_minutes: None,
        });
    }

    /// Move a known build to `status`, as the backend would when it finishes.
    pub fn set_status(&self, id: BuildId, status: BuildStatus) {
        for build in self.builds.lock().unwrap().iter_mut() {
            if build.id == id {
                build.status = status;
            }
        }
    }

    pub fn scheduled_builders(&self) -> Vec<String> {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.builder.clone())
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::Backend("build backend unavailable".to_string()));
        }
        Ok(())
    }

    /// Scheduled builds become searchable, like in the real backend.
    fn schedule(&self, request: ScheduleBuildRequest) -> Build {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let build = Build {
            id: BuildId(id),
            builder: request.builder.clone(),
            status: BuildStatus::Scheduled,
            tags: request.tags.clone(),
            create_time: Utc.timestamp_opt(1_000_000 + id, 0).unwrap(),
            properties: request.properties.clone(),
            timeout_minutes: request.timeout_minutes,
        };
        self.builds.lock().unwrap().push(build.clone());
        self.scheduled.lock().unwrap().push(request);
        build
    }

    fn search(&self, predicate: &BuildPredicate) -> Vec<Build> {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|b| predicate.matches(b))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn schedule_build(&self, request: ScheduleBuildRequest) -> Result<Build> {
        self.check_available()?;
        self.log
            .lock()
            .unwrap()
            .push(format!("schedule:{}", request.builder));
        Ok(self.schedule(request))
    }

    async fn search_builds(&self, predicate: BuildPredicate) -> Result<Vec<Build>> {
        self.check_available()?;
        Ok(self.search(&predicate))
    }

    async fn batch(&self, requests: Vec<BatchRequest>) -> Result<Vec<BatchResponse>> {
        self.check_available()?;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("batch:{}", requests.len()));

        let rejected = self.rejected_builders.lock().unwrap().clone();
        Ok(requests
            .into_iter()
            .map(|request| match request {
                BatchRequest::Schedule(r) if rejected.contains(&r.builder) => {
                    BatchResponse::Error {
                        message: format!("builder {} not found", r.builder),
                    }
                }
                BatchRequest::Schedule(r) => BatchResponse::Scheduled(self.schedule(r)),
                BatchRequest::Search(p) => BatchResponse::Found(self.search(&p)),
            })
            .collect())
    }
}

/// Memory datastore that rejects inserts for chosen shas.
#[derive(Default)]
pub struct FailingDatastore {
    pub inner: MemoryDatastore,
    pub reject: Mutex<HashSet<String>>,
}

impl FailingDatastore {
    pub fn rejecting(shas: &[&str]) -> Self {
        Self {
            inner: MemoryDatastore::new(),
            reject: Mutex::new(shas.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl Datastore for FailingDatastore {
    async fn lookup_commit(&self, key: &CommitKey) -> Result<Option<Commit>> {
        self.inner.lookup_commit(key).await
    }

    async fn insert_commit(&self, commit: &Commit, tasks: &[Task]) -> Result<()> {
        if self.reject.lock().unwrap().contains(&commit.sha) {
            return Err(Error::Database("transaction aborted".to_string()));
        }
        self.inner.insert_commit(commit, tasks).await
    }

    async fn tasks_for_commit(&self, key: &CommitKey) -> Result<Vec<Task>> {
        self.inner.tasks_for_commit(key).await
    }
}

pub fn engine() -> RepositorySlug {
    RepositorySlug::new("acme", "engine")
}

/// A scheduler wired to fresh fakes, supporting `acme/engine`.
pub struct Harness {
    pub scheduler: crate::Scheduler,
    pub fetcher: Arc<FakeFetcher>,
    pub datastore: Arc<FailingDatastore>,
    pub checks: Arc<FakeCheckService>,
    pub builds: Arc<FakeBuildService>,
    pub log: CallLog,
}

impl Harness {
    pub fn new(fetcher: FakeFetcher) -> Self {
        Self::build(fetcher, FailingDatastore::default(), Vec::new(), Vec::new(), false)
    }

    pub fn with_datastore(fetcher: FakeFetcher, datastore: FailingDatastore) -> Self {
        Self::build(fetcher, datastore, Vec::new(), Vec::new(), false)
    }

    pub fn with_legacy(fetcher: FakeFetcher, presubmit: &[&str], postsubmit: &[&str]) -> Self {
        Self::build(
            fetcher,
            FailingDatastore::default(),
            presubmit.iter().map(|s| s.to_string()).collect(),
            postsubmit.iter().map(|s| s.to_string()).collect(),
            false,
        )
    }

    pub fn with_unavailable_builds(fetcher: FakeFetcher) -> Self {
        Self::build(fetcher, FailingDatastore::default(), Vec::new(), Vec::new(), true)
    }

    fn build(
        fetcher: FakeFetcher,
        datastore: FailingDatastore,
        presubmit_builders: Vec<String>,
        postsubmit_builders: Vec<String>,
        builds_unavailable: bool,
    ) -> Self {
        let mut repo = conductor_config::RepositoryConfig::new(engine());
        repo.presubmit_builders = presubmit_builders;
        repo.postsubmit_builders = postsubmit_builders;
        let system = conductor_config::SystemConfig {
            repositories: vec![repo],
            ..Default::default()
        };

        let log = CallLog::default();
        let fetcher = Arc::new(fetcher);
        let datastore = Arc::new(datastore);
        let checks = Arc::new(FakeCheckService::new(log.clone()));
        let builds = Arc::new(if builds_unavailable {
            FakeBuildService::unavailable(log.clone())
        } else {
            FakeBuildService::new(log.clone())
        });

        let scheduler = crate::Scheduler::new(
            Arc::new(system),
            fetcher.clone(),
            datastore.clone(),
            checks.clone(),
            builds.clone(),
        );

        Self {
            scheduler,
            fetcher,
            datastore,
            checks,
            builds,
            log,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

//! Job lifecycle tests against an in-memory Jenkins
//!
//! The fake master hands out build numbers, keeps whatever results a test
//! scripts for them and honours stop requests, so these tests drive the
//! executor through several reconcile passes the way the controller does.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use jenkins_operator::crd::{BuildStatus, Jenkins, JenkinsSpec, JenkinsStatus};
use jenkins_operator::fingerprint::fingerprint_map;
use jenkins_operator::jenkins::JenkinsApi;
use jenkins_operator::jobs::{JobExecutor, JobRequest, StatusStore};
use jenkins_operator::plugins::{verify, InstalledPlugin, PluginRequirementSet};
use jenkins_operator::{Error, Result};

#[derive(Default)]
struct FakeState {
    last_number: i64,
    submissions: Vec<(String, BTreeMap<String, String>)>,
    results: HashMap<(String, i64), String>,
    stops: Vec<(String, i64)>,
}

/// In-memory master: builds never finish unless a test says so
#[derive(Default)]
struct FakeJenkins {
    state: Mutex<FakeState>,
}

impl FakeJenkins {
    fn finish(&self, job: &str, number: i64, result: &str) {
        self.state
            .lock()
            .unwrap()
            .results
            .insert((job.to_string(), number), result.to_string());
    }

    fn submissions(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state.lock().unwrap().submissions.clone()
    }

    fn stops(&self) -> Vec<(String, i64)> {
        self.state.lock().unwrap().stops.clone()
    }
}

#[async_trait]
impl JenkinsApi for FakeJenkins {
    async fn build_job(&self, job_name: &str, parameters: &BTreeMap<String, String>) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.last_number += 1;
        state
            .submissions
            .push((job_name.to_string(), parameters.clone()));
        Ok(state.last_number)
    }

    async fn build_result(&self, job_name: &str, number: i64) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        if number > state.last_number {
            return Err(Error::jenkins_status(404, format!("no build #{number}")));
        }
        Ok(state.results.get(&(job_name.to_string(), number)).cloned())
    }

    async fn stop_build(&self, job_name: &str, number: i64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.stops.push((job_name.to_string(), number));
        state
            .results
            .insert((job_name.to_string(), number), "ABORTED".to_string());
        Ok(true)
    }

    async fn create_or_update_job(&self, _config_xml: &str, _job_name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn installed_plugins(&self) -> Result<Vec<InstalledPlugin>> {
        Ok(Vec::new())
    }

    async fn generate_token(&self, _user: &str, _token_name: &str) -> Result<String> {
        Ok("token".to_string())
    }
}

/// Keeps the last persisted status, like the status subresource would
#[derive(Default)]
struct MemoryStore {
    persisted: Mutex<Option<JenkinsStatus>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    fn persisted(&self) -> Option<JenkinsStatus> {
        self.persisted.lock().unwrap().clone()
    }

    fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn update_status(&self, jenkins: &mut Jenkins) -> Result<()> {
        *self.persisted.lock().unwrap() = jenkins.status.clone();
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}

fn jenkins() -> Jenkins {
    let mut jenkins = Jenkins::new("example", JenkinsSpec::default());
    jenkins.metadata.namespace = Some("ci".to_string());
    jenkins
}

fn record<'a>(jenkins: &'a Jenkins, job: &str, hash: &str) -> Option<&'a jenkins_operator::crd::Build> {
    jenkins.status.as_ref().and_then(|s| s.builds.find(job, hash))
}

fn seed_request() -> JobRequest {
    JobRequest::new("seed-x", "h1")
        .with_parameters(BTreeMap::from([(
            "REPOSITORY_URL".to_string(),
            "https://github.com/example/jobs.git".to_string(),
        )]))
        .preserved()
}

/// Story: a seed job is provisioned for the first time. The first pass
/// submits it, the next pass observes the success and keeps the record so
/// later passes know the content was applied.
#[tokio::test]
async fn preserved_job_is_submitted_once_and_kept_after_success() {
    let api = FakeJenkins::default();
    let store = MemoryStore::default();
    let executor = JobExecutor::new(&api, &store);
    let mut jenkins = jenkins();
    let request = seed_request();

    assert!(!executor.ensure_job(&mut jenkins, &request).await.unwrap());

    assert_eq!(api.submissions().len(), 1);
    assert_eq!(api.submissions()[0].1, request.parameters);
    let build = record(&jenkins, "seed-x", "h1").unwrap();
    assert_eq!(build.status, BuildStatus::Running);
    assert_eq!(build.retries, 0);
    assert_eq!(build.number, 1);

    // still building
    assert!(!executor.ensure_job(&mut jenkins, &request).await.unwrap());

    api.finish("seed-x", 1, "SUCCESS");
    assert!(executor.ensure_job(&mut jenkins, &request).await.unwrap());
    assert!(executor.ensure_job(&mut jenkins, &request).await.unwrap());

    assert_eq!(api.submissions().len(), 1);
    let build = record(&jenkins, "seed-x", "h1").unwrap();
    assert_eq!(build.status, BuildStatus::Success);
    assert_eq!(store.persisted(), jenkins.status);
}

/// Story: a one-off job whose success was recorded by an earlier pass. It
/// is reported done without resubmission and its record goes away.
#[tokio::test]
async fn successful_unpreserved_job_is_not_resubmitted() {
    let api = FakeJenkins::default();
    let store = MemoryStore::default();
    let executor = JobExecutor::new(&api, &store);
    let mut jenkins = jenkins();
    let request = JobRequest::new("restart", "h1");

    executor.ensure_job(&mut jenkins, &request).await.unwrap();
    api.finish("restart", 1, "SUCCESS");

    assert!(executor.ensure_job(&mut jenkins, &request).await.unwrap());

    assert_eq!(api.submissions().len(), 1);
    assert!(record(&jenkins, "restart", "h1").is_none());
    assert!(store.persisted().unwrap().builds.is_empty());
}

/// Story: a job that keeps failing. With one retry allowed it is resubmitted
/// once, then reported unrecoverable and forgotten.
#[tokio::test]
async fn retries_are_bounded() {
    let api = FakeJenkins::default();
    let store = MemoryStore::default();
    let executor = JobExecutor::new(&api, &store).with_max_retries(1);
    let mut jenkins = jenkins();
    let request = JobRequest::new("flaky", "h1");

    assert!(!executor.ensure_job(&mut jenkins, &request).await.unwrap());
    api.finish("flaky", 1, "FAILURE");

    // a retryable failure is in progress, not an error
    assert!(!executor.ensure_job(&mut jenkins, &request).await.unwrap());
    let build = record(&jenkins, "flaky", "h1").unwrap();
    assert_eq!(build.retries, 1);
    assert_eq!(build.number, 2);
    assert_eq!(build.status, BuildStatus::Running);

    api.finish("flaky", 2, "FAILURE");
    let err = executor.ensure_job(&mut jenkins, &request).await.unwrap_err();

    assert!(matches!(err, Error::Unrecoverable { ref job } if job == "flaky"));
    assert_eq!(api.submissions().len(), 2);
    assert!(record(&jenkins, "flaky", "h1").is_none());
}

/// Story: the user edits the scripts while the previous version is still
/// being applied. Both versions are tracked as separate builds.
#[tokio::test]
async fn distinct_fingerprints_are_tracked_separately() {
    let api = FakeJenkins::default();
    let store = MemoryStore::default();
    let executor = JobExecutor::new(&api, &store);
    let mut jenkins = jenkins();
    let first = JobRequest::new("scripts", "h1").preserved();
    let second = JobRequest::new("scripts", "h2").preserved();

    executor.ensure_job(&mut jenkins, &first).await.unwrap();
    executor.ensure_job(&mut jenkins, &second).await.unwrap();

    assert_eq!(api.submissions().len(), 2);
    assert_eq!(record(&jenkins, "scripts", "h1").unwrap().number, 1);
    assert_eq!(record(&jenkins, "scripts", "h2").unwrap().number, 2);

    api.finish("scripts", 2, "SUCCESS");
    assert!(!executor.ensure_job(&mut jenkins, &first).await.unwrap());
    assert!(executor.ensure_job(&mut jenkins, &second).await.unwrap());
}

/// Story: a build is stuck and marked expired. The executor stops it,
/// confirms the abort and reports the job done.
#[tokio::test]
async fn expired_build_is_stopped_and_done() {
    let api = FakeJenkins::default();
    let store = MemoryStore::default();
    let executor = JobExecutor::new(&api, &store);
    let mut jenkins = jenkins();
    let request = JobRequest::new("stuck", "h1");

    executor.ensure_job(&mut jenkins, &request).await.unwrap();
    let mut build = record(&jenkins, "stuck", "h1").cloned().unwrap();
    build.status = BuildStatus::Expired;
    jenkins
        .status_mut()
        .builds
        .upsert(build, chrono::Utc::now());

    assert!(executor.ensure_job(&mut jenkins, &request).await.unwrap());

    assert_eq!(api.stops(), vec![("stuck".to_string(), 1)]);
    assert!(record(&jenkins, "stuck", "h1").is_none());
}

/// Story: a build is submitted but Jenkins hasn't registered it yet, so
/// polling it counts as still running.
#[tokio::test]
async fn unregistered_build_is_in_progress() {
    let api = FakeJenkins::default();
    let store = MemoryStore::default();
    let executor = JobExecutor::new(&api, &store);
    let mut jenkins = jenkins();
    let mut build = jenkins_operator::crd::Build::running("queued", "h1", 7);
    build.create_time = Some(chrono::Utc::now());
    jenkins.status_mut().builds.upsert(build, chrono::Utc::now());

    let done = executor
        .ensure_job(&mut jenkins, &JobRequest::new("queued", "h1"))
        .await
        .unwrap();

    assert!(!done);
    assert!(api.submissions().is_empty());
    assert_eq!(store.writes(), 0);
}

#[test]
fn fingerprints_ignore_key_order() {
    let ordered = BTreeMap::from([("a", "1"), ("b", "2")]);
    let shuffled = HashMap::from([("b", "2"), ("a", "1")]);
    let changed = BTreeMap::from([("a", "1"), ("b", "3")]);

    assert_eq!(fingerprint_map(&ordered), fingerprint_map(&shuffled));
    assert_ne!(fingerprint_map(&ordered), fingerprint_map(&changed));
}

#[test]
fn plugin_version_conflicts_across_sets() {
    let root = PluginRequirementSet::new().with("root:1.0", &["plugin:0.1"]);
    let conflicting = PluginRequirementSet::new().with("other:2.0", &["plugin:0.2"]);
    let agreeing = PluginRequirementSet::new().with("other:2.0", &["plugin:0.1"]);

    assert!(!verify(&[&root, &conflicting]));
    assert!(verify(&[&root, &agreeing]));
}

//! Seed job provisioning
//!
//! Every entry of `spec.seedJobs` becomes a job DSL seed job. One
//! parameterized pipeline creates them: each entry is a build of that
//! pipeline keyed by a fingerprint of the entry and its deploy key, so an
//! entry is provisioned again only when it changes. Records are preserved
//! and entries progress independently in the ledger.

use std::collections::BTreeMap;

use kube::ResourceExt;
use minijinja::context;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::KubeClient;
use crate::crd::{Jenkins, SeedJob};
use crate::fingerprint::fingerprint_fields;
use crate::jenkins::JenkinsApi;
use crate::jobs::{JobExecutor, JobRequest};
use crate::resources::SEED_JOB_SUFFIX;
use crate::templates;
use crate::{Error, Result};

/// Pipeline creating the seed jobs
pub const CONFIGURE_SEED_JOB_NAME: &str = "jenkins-operator-configure-seed-job";

/// Id of the deploy key credential, also the seed job name prefix
pub const DEPLOY_KEY_ID_PARAMETER: &str = "DEPLOY_KEY_ID";
/// PEM-encoded deploy key, empty for public repositories
pub const PRIVATE_KEY_PARAMETER: &str = "PRIVATE_KEY";
/// Clone URL
pub const REPOSITORY_URL_PARAMETER: &str = "REPOSITORY_URL";
/// Branch to check out
pub const REPOSITORY_BRANCH_PARAMETER: &str = "REPOSITORY_BRANCH";
/// Job DSL files to process
pub const TARGETS_PARAMETER: &str = "TARGETS";
/// Display name of the created seed job
pub const DISPLAY_NAME_PARAMETER: &str = "SEED_JOB_DISPLAY_NAME";

const DEFAULT_BRANCH: &str = "master";
const DEFAULT_TARGETS: &str = "cicd/jobs/*.jenkins";

#[derive(Serialize)]
struct ParameterDefinition {
    name: &'static str,
    default: &'static str,
}

/// The config.xml of [`CONFIGURE_SEED_JOB_NAME`]
pub fn definition() -> Result<String> {
    let parameter = |name, default| ParameterDefinition { name, default };
    templates::render(
        "seed-job.xml",
        templates::SEED_JOB,
        context! {
            seed_job_suffix => SEED_JOB_SUFFIX,
            parameters => vec![
                parameter(DEPLOY_KEY_ID_PARAMETER, ""),
                parameter(PRIVATE_KEY_PARAMETER, ""),
                parameter(REPOSITORY_URL_PARAMETER, ""),
                parameter(REPOSITORY_BRANCH_PARAMETER, DEFAULT_BRANCH),
                parameter(TARGETS_PARAMETER, DEFAULT_TARGETS),
                parameter(DISPLAY_NAME_PARAMETER, ""),
            ],
        },
    )
}

/// Create or overwrite the seed job pipeline on the master
pub async fn configure(api: &dyn JenkinsApi) -> Result<()> {
    if api
        .create_or_update_job(&definition()?, CONFIGURE_SEED_JOB_NAME)
        .await?
    {
        info!(job = CONFIGURE_SEED_JOB_NAME, "Created seed job pipeline");
    }
    Ok(())
}

/// Display name of the seed job created for `seed_job`
pub fn display_name(seed_job: &SeedJob) -> String {
    format!("Seed Job from {}", seed_job.id)
}

/// Deploy key of a seed job, empty when none is referenced
pub async fn private_key(
    kube: &dyn KubeClient,
    namespace: &str,
    seed_job: &SeedJob,
) -> Result<String> {
    let Some(key_ref) = &seed_job.private_key.secret_key_ref else {
        return Ok(String::new());
    };
    let secret = kube
        .get_secret(namespace, &key_ref.name)
        .await?
        .ok_or_else(|| Error::missing_resource(format!("secret '{}'", key_ref.name)))?;
    let value = secret
        .data
        .and_then(|mut data| data.remove(&key_ref.key))
        .ok_or_else(|| {
            Error::missing_resource(format!("key '{}' in secret '{}'", key_ref.key, key_ref.name))
        })?;
    String::from_utf8(value.0)
        .map_err(|_| Error::validation(format!("private key of seed job '{}' is not UTF-8", seed_job.id)))
}

/// Build request provisioning `seed_job` with the given deploy key
pub fn request(seed_job: &SeedJob, private_key: &str) -> JobRequest {
    let or_default = |value: &str, default: &str| {
        if value.is_empty() {
            default.to_string()
        } else {
            value.to_string()
        }
    };
    let branch = or_default(&seed_job.repository_branch, DEFAULT_BRANCH);
    let targets = or_default(&seed_job.targets, DEFAULT_TARGETS);
    let display_name = display_name(seed_job);

    let hash = fingerprint_fields([
        seed_job.id.as_str(),
        private_key,
        seed_job.repository_url.as_str(),
        branch.as_str(),
        targets.as_str(),
        display_name.as_str(),
    ]);

    let parameters = BTreeMap::from([
        (DEPLOY_KEY_ID_PARAMETER.to_string(), seed_job.id.clone()),
        (PRIVATE_KEY_PARAMETER.to_string(), private_key.to_string()),
        (REPOSITORY_URL_PARAMETER.to_string(), seed_job.repository_url.clone()),
        (REPOSITORY_BRANCH_PARAMETER.to_string(), branch),
        (TARGETS_PARAMETER.to_string(), targets),
        (DISPLAY_NAME_PARAMETER.to_string(), display_name),
    ]);

    JobRequest::new(CONFIGURE_SEED_JOB_NAME, hash)
        .with_parameters(parameters)
        .preserved()
}

/// Ensure every declared seed job has been provisioned.
///
/// Every entry is driven on each pass, so an entry whose job failed for
/// good does not hold back the others. Done only when every entry is done;
/// the first job error is returned after all entries were driven. Records
/// of entries no longer declared are dropped.
pub async fn ensure(
    executor: &JobExecutor<'_>,
    kube: &dyn KubeClient,
    jenkins: &mut Jenkins,
) -> Result<bool> {
    let namespace = jenkins.namespace().unwrap_or_default();
    let mut requests = Vec::with_capacity(jenkins.spec.seed_jobs.len());
    for seed_job in &jenkins.spec.seed_jobs {
        let key = private_key(kube, &namespace, seed_job).await?;
        requests.push((seed_job.id.clone(), request(seed_job, &key)));
    }

    let declared: Vec<&str> = requests.iter().map(|(_, r)| r.hash.as_str()).collect();
    let pruned = jenkins
        .status_mut()
        .builds
        .retain_hashes(CONFIGURE_SEED_JOB_NAME, &declared);
    if pruned > 0 {
        debug!(pruned, "Dropped records of removed seed jobs");
        executor.store().update_status(jenkins).await?;
    }

    let mut all_done = true;
    let mut first_error = None;
    for (id, request) in &requests {
        match executor.ensure_job(jenkins, request).await {
            Ok(done) => {
                debug!(seed_job = %id, done, "Seed job progress");
                all_done &= done;
            }
            Err(e) => {
                warn!(seed_job = %id, error = %e, "Seed job failed");
                all_done = false;
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(all_done),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;
    use crate::crd::{Build, BuildStatus, JenkinsStatus, PrivateKey, SecretKeyRef};
    use crate::jenkins::MockJenkinsApi;
    use crate::jobs::MockStatusStore;
    use crate::resources::test_fixtures::jenkins;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use mockall::predicate::eq;

    fn seed(id: &str) -> SeedJob {
        SeedJob {
            id: id.to_string(),
            repository_url: format!("https://github.com/example/{id}.git"),
            ..Default::default()
        }
    }

    fn with_key(mut seed_job: SeedJob) -> SeedJob {
        seed_job.private_key = PrivateKey {
            secret_key_ref: Some(SecretKeyRef {
                name: "deploy-keys".to_string(),
                key: "id_rsa".to_string(),
            }),
        };
        seed_job
    }

    fn key_secret() -> Secret {
        Secret {
            data: Some(BTreeMap::from([(
                "id_rsa".to_string(),
                ByteString(b"PEM".to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn definition_declares_every_parameter() {
        let xml = definition().unwrap();
        for name in [
            DEPLOY_KEY_ID_PARAMETER,
            PRIVATE_KEY_PARAMETER,
            REPOSITORY_URL_PARAMETER,
            REPOSITORY_BRANCH_PARAMETER,
            TARGETS_PARAMETER,
            DISPLAY_NAME_PARAMETER,
        ] {
            assert!(xml.contains(&format!("<name>{name}</name>")), "{name} missing");
        }
        assert!(xml.contains("<defaultValue>master</defaultValue>"));
        assert!(xml.contains("job-dsl-seed"));
    }

    mod requests {
        use super::*;

        #[test]
        fn empty_branch_and_targets_get_defaults() {
            let request = request(&seed("jobs"), "");
            assert_eq!(request.parameters[REPOSITORY_BRANCH_PARAMETER], "master");
            assert_eq!(request.parameters[TARGETS_PARAMETER], "cicd/jobs/*.jenkins");
            assert_eq!(request.parameters[DISPLAY_NAME_PARAMETER], "Seed Job from jobs");
            assert!(request.preserve_status);
        }

        #[test]
        fn rotating_the_deploy_key_changes_the_fingerprint() {
            let a = request(&seed("jobs"), "key-1");
            let b = request(&seed("jobs"), "key-2");
            assert_ne!(a.hash, b.hash);
            assert_eq!(a.hash, request(&seed("jobs"), "key-1").hash);
        }

        #[test]
        fn each_entry_has_its_own_fingerprint() {
            assert_ne!(request(&seed("a"), "").hash, request(&seed("b"), "").hash);
        }
    }

    mod private_keys {
        use super::*;

        #[tokio::test]
        async fn public_repository_has_no_key() {
            let kube = MockKubeClient::new();
            let key = private_key(&kube, "ci", &seed("jobs")).await.unwrap();
            assert!(key.is_empty());
        }

        #[tokio::test]
        async fn referenced_key_is_read_from_the_secret() {
            let mut kube = MockKubeClient::new();
            kube.expect_get_secret()
                .with(eq("ci"), eq("deploy-keys"))
                .returning(|_, _| Ok(Some(key_secret())));

            let key = private_key(&kube, "ci", &with_key(seed("jobs"))).await.unwrap();
            assert_eq!(key, "PEM");
        }

        #[tokio::test]
        async fn missing_secret_is_an_error() {
            let mut kube = MockKubeClient::new();
            kube.expect_get_secret().returning(|_, _| Ok(None));

            let err = private_key(&kube, "ci", &with_key(seed("jobs")))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MissingResource(_)));
        }
    }

    /// Story: two repositories are declared. The first was provisioned in
    /// an earlier pass, the second is submitted now; the pass is not done
    /// until both are.
    #[tokio::test]
    async fn entries_progress_independently() {
        let mut jenkins = jenkins("example");
        jenkins.spec.seed_jobs = vec![seed("first"), seed("second")];
        let mut done = Build::running(CONFIGURE_SEED_JOB_NAME, request(&seed("first"), "").hash, 1);
        done.status = BuildStatus::Success;
        jenkins.status = Some(JenkinsStatus {
            builds: [done].into_iter().collect(),
            ..Default::default()
        });

        let mut api = MockJenkinsApi::new();
        api.expect_build_job()
            .withf(|job, params| {
                job == CONFIGURE_SEED_JOB_NAME && params[DEPLOY_KEY_ID_PARAMETER] == "second"
            })
            .times(1)
            .returning(|_, _| Ok(2));
        let mut store = MockStatusStore::new();
        store.expect_update_status().times(1).returning(|_| Ok(()));
        let kube = MockKubeClient::new();
        let executor = JobExecutor::new(&api, &store);

        let all_done = ensure(&executor, &kube, &mut jenkins).await.unwrap();

        assert!(!all_done);
        assert_eq!(jenkins.status.unwrap().builds.len(), 2);
    }

    /// Story: the first repository's job exhausted its retries. The second
    /// repository is still provisioned on the same pass, and the pass
    /// reports the first failure afterwards.
    #[tokio::test]
    async fn exhausted_entry_does_not_block_later_entries() {
        let mut jenkins = jenkins("example");
        jenkins.spec.seed_jobs = vec![seed("first"), seed("second")];
        let mut exhausted = Build::running(CONFIGURE_SEED_JOB_NAME, request(&seed("first"), "").hash, 1);
        exhausted.status = BuildStatus::Failure;
        exhausted.retries = 3;
        jenkins.status = Some(JenkinsStatus {
            builds: [exhausted].into_iter().collect(),
            ..Default::default()
        });

        let mut api = MockJenkinsApi::new();
        api.expect_build_job()
            .withf(|job, params| {
                job == CONFIGURE_SEED_JOB_NAME && params[DEPLOY_KEY_ID_PARAMETER] == "second"
            })
            .times(1)
            .returning(|_, _| Ok(2));
        let mut store = MockStatusStore::new();
        store.expect_update_status().times(1).returning(|_| Ok(()));
        let kube = MockKubeClient::new();
        let executor = JobExecutor::new(&api, &store).with_max_retries(3);

        let err = ensure(&executor, &kube, &mut jenkins).await.unwrap_err();

        assert!(matches!(err, Error::Unrecoverable { ref job } if job == CONFIGURE_SEED_JOB_NAME));
        let builds = jenkins.status.unwrap().builds;
        assert!(builds
            .find(CONFIGURE_SEED_JOB_NAME, &request(&seed("second"), "").hash)
            .is_some());
    }

    /// Story: a repository was removed from the resource and another one
    /// edited. Records of the removed entry and of the old edit are
    /// dropped; the kept entry is not resubmitted.
    #[tokio::test]
    async fn records_of_undeclared_entries_are_dropped() {
        let mut jenkins = jenkins("example");
        jenkins.spec.seed_jobs = vec![seed("kept")];
        let mut kept = Build::running(CONFIGURE_SEED_JOB_NAME, request(&seed("kept"), "").hash, 1);
        kept.status = BuildStatus::Success;
        let removed = Build::running(CONFIGURE_SEED_JOB_NAME, request(&seed("removed"), "").hash, 2);
        let mut edited = seed("kept");
        edited.repository_branch = "develop".to_string();
        let mut stale = Build::running(CONFIGURE_SEED_JOB_NAME, request(&edited, "").hash, 3);
        stale.status = BuildStatus::Failure;
        jenkins.status = Some(JenkinsStatus {
            builds: [kept, removed, stale].into_iter().collect(),
            ..Default::default()
        });

        let api = MockJenkinsApi::new();
        let mut store = MockStatusStore::new();
        store.expect_update_status().times(1).returning(|_| Ok(()));
        let kube = MockKubeClient::new();
        let executor = JobExecutor::new(&api, &store);

        assert!(ensure(&executor, &kube, &mut jenkins).await.unwrap());

        let builds = jenkins.status.unwrap().builds;
        assert_eq!(builds.len(), 1);
        assert!(builds
            .find(CONFIGURE_SEED_JOB_NAME, &request(&seed("kept"), "").hash)
            .is_some());
    }

    #[tokio::test]
    async fn no_declared_repositories_is_done() {
        let mut jenkins = jenkins("example");
        let api = MockJenkinsApi::new();
        let store = MockStatusStore::new();
        let kube = MockKubeClient::new();
        let executor = JobExecutor::new(&api, &store);

        assert!(ensure(&executor, &kube, &mut jenkins).await.unwrap());
    }
}

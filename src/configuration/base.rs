//! Base configuration phase
//!
//! Provisions everything a master needs, waits for it to come up, obtains
//! an authenticated client and applies the operator's own groovy scripts.
//! Steps run strictly in order and the phase returns at the first one that
//! is not done.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, ResourceRequirements, Secret};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use regex::Regex;
use tracing::{debug, info, warn};

use super::{Progress, ReconcileOptions, ScriptJob, POD_REQUEUE, UPDATE_REQUEUE};
use crate::backup::{plugins_required_by_all, BackupStrategy};
use crate::controller::KubeClient;
use crate::crd::{Jenkins, JenkinsStatus};
use crate::jenkins::{api_url, JenkinsApi, JenkinsConnector};
use crate::jobs::StatusStore;
use crate::plugins::{self, base_plugins, Plugin, PluginRequirementSet};
use crate::resources::{
    backup_credentials_secret, backup_credentials_secret_name, base_configuration_config_map,
    init_configuration_config_map, master_pod, master_service, operator_credentials_secret,
    operator_credentials_secret_name, resource_name, role, role_binding, scripts_config_map,
    service_account, user_configuration_config_map, user_configuration_config_map_name,
    watched_labels, BASE_CONFIGURATION_PATH, HTTP_PORT, PASSWORD_KEY, TOKEN_CREATION_TIME_KEY,
    TOKEN_KEY, USER_NAME_KEY,
};
use crate::{Error, Result};

/// Script-sync job applying the base configuration scripts
pub const BASE_CONFIGURATION_JOB_NAME: &str = "jenkins-operator-base-configuration";

/// Name of the API token the operator generates for itself
const TOKEN_NAME: &str = "token";

/// Docker image reference: `[domain[:port]/]name[/name...][:tag][@digest]`
static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let domain = format!(r"{domain_component}(?:\.{domain_component})*(?::[0-9]+)?");
    let name_component = r"[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*";
    let tag = r"[\w][\w.-]{0,127}";
    let digest = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";
    Regex::new(&format!(
        r"^(?:{domain}/)?{name_component}(?:/{name_component})*(?::{tag})?(?:@{digest})?$"
    ))
    .expect("constant regex pattern is valid")
});

/// Check the parts of the resource the base phase depends on.
///
/// Returns one message per problem; an empty list means valid.
pub async fn validate(kube: &dyn KubeClient, jenkins: &Jenkins) -> Result<Vec<String>> {
    let mut problems = Vec::new();
    let spec = &jenkins.spec;

    if spec.master.image.is_empty() {
        problems.push("spec.master.image is not set".to_string());
    } else if !IMAGE_REFERENCE.is_match(&spec.master.image) {
        problems.push(format!(
            "spec.master.image '{}' is not a valid image reference",
            spec.master.image
        ));
    }

    problems.extend(validate_plugins(&spec.master.plugins));

    match BackupStrategy::from_tag(&spec.backup) {
        Err(e) => problems.push(e.to_string()),
        Ok(BackupStrategy::NoBackup) => {}
        Ok(strategy) => {
            let namespace = jenkins.namespace().unwrap_or_default();
            let secret_name = backup_credentials_secret_name(jenkins);
            if kube.get_secret(&namespace, &secret_name).await?.is_none() {
                problems.push(format!(
                    "create secret '{secret_name}' in namespace '{namespace}' with the {strategy} backup credentials"
                ));
            }
            if !strategy.validate_config(spec) {
                problems.push(format!("{strategy} backup configuration is incomplete"));
            }
        }
    }

    for problem in &problems {
        warn!(jenkins = %jenkins.name_any(), %problem, "Base configuration is invalid");
    }
    Ok(problems)
}

fn validate_plugins(declared: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut problems: Vec<String> = declared
        .iter()
        .flat_map(|(root, deps)| std::iter::once(root).chain(deps))
        .filter_map(|identifier| Plugin::parse(identifier).err())
        .map(|e| format!("spec.master.plugins: {e}"))
        .collect();

    if problems.is_empty() && !plugins::verify(&[&PluginRequirementSet::from(declared.clone())]) {
        problems.push("spec.master.plugins requires conflicting plugin versions".to_string());
    }
    problems
}

/// Where the base phase got to
pub enum BaseOutcome {
    /// A step is not done yet or halted
    Pending(Progress),
    /// The master is configured; a client for the user phase
    Ready(Arc<dyn JenkinsApi>),
}

/// Runs the base phase for one Jenkins resource
pub struct BaseReconciler<'a> {
    kube: &'a dyn KubeClient,
    connector: &'a dyn JenkinsConnector,
    store: &'a dyn StatusStore,
    options: &'a ReconcileOptions,
}

impl<'a> BaseReconciler<'a> {
    /// Reconciler using the given seams
    pub fn new(
        kube: &'a dyn KubeClient,
        connector: &'a dyn JenkinsConnector,
        store: &'a dyn StatusStore,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            kube,
            connector,
            store,
            options,
        }
    }

    /// Drive the base phase one step further
    pub async fn reconcile(&self, jenkins: &mut Jenkins) -> Result<BaseOutcome> {
        self.ensure_resources(jenkins).await?;

        if self.merge_backup_plugins(jenkins).await? {
            return Ok(BaseOutcome::Pending(Progress::Requeue(UPDATE_REQUEUE)));
        }

        let Some(pod) = self.ensure_master_pod(jenkins).await? else {
            return Ok(BaseOutcome::Pending(Progress::Requeue(POD_REQUEUE)));
        };
        if !is_ready(&pod) {
            debug!(pod = %pod.name_any(), "Waiting for the master pod to become ready");
            return Ok(BaseOutcome::Pending(Progress::Requeue(POD_REQUEUE)));
        }

        let api = self.ensure_jenkins_client(jenkins, &pod).await?;

        if !self.plugins_installed(api.as_ref()).await? {
            warn!("Required plugins are missing, restarting the master");
            self.delete_master_pod(jenkins).await?;
            return Ok(BaseOutcome::Pending(Progress::Requeue(POD_REQUEUE)));
        }

        match self.ensure_base_configuration(api.as_ref(), jenkins).await? {
            Progress::Done => Ok(BaseOutcome::Ready(api)),
            progress => Ok(BaseOutcome::Pending(progress)),
        }
    }

    async fn ensure_resources(&self, jenkins: &Jenkins) -> Result<()> {
        let namespace = jenkins.namespace().unwrap_or_default();

        let credentials_name = operator_credentials_secret_name(jenkins);
        if self.kube.get_secret(&namespace, &credentials_name).await?.is_none() {
            let secret = operator_credentials_secret(jenkins, &mut rand::thread_rng());
            self.kube.create_secret(&secret).await?;
            info!(secret = %credentials_name, "Created operator credentials");
        }

        self.kube.apply_config_map(&scripts_config_map(jenkins)?).await?;
        self.kube
            .apply_config_map(&init_configuration_config_map(jenkins)?)
            .await?;
        self.kube
            .apply_config_map(&base_configuration_config_map(jenkins)?)
            .await?;

        let user_config_name = user_configuration_config_map_name(jenkins);
        if self
            .kube
            .get_config_map(&namespace, &user_config_name)
            .await?
            .is_none()
        {
            self.kube
                .create_config_map(&user_configuration_config_map(jenkins))
                .await?;
            info!(config_map = %user_config_name, "Created user configuration");
        }

        self.kube.apply_service_account(&service_account(jenkins)).await?;
        self.kube.apply_role(&role(jenkins)).await?;
        self.kube.apply_role_binding(&role_binding(jenkins)).await?;
        self.kube
            .apply_service(&master_service(jenkins, self.options.minikube))
            .await?;

        self.ensure_backup_credentials(jenkins, &namespace).await
    }

    /// The backup credentials secret is user-owned: create it empty, and
    /// only ever repair its labels so edits keep triggering reconciles.
    async fn ensure_backup_credentials(&self, jenkins: &Jenkins, namespace: &str) -> Result<()> {
        let name = backup_credentials_secret_name(jenkins);
        let Some(mut secret) = self.kube.get_secret(namespace, &name).await? else {
            self.kube
                .create_secret(&backup_credentials_secret(jenkins))
                .await?;
            info!(secret = %name, "Created backup credentials");
            return Ok(());
        };

        let wanted = watched_labels(jenkins);
        let labels = secret.labels_mut();
        let missing = wanted.iter().any(|(k, v)| labels.get(k) != Some(v));
        if missing {
            labels.extend(wanted);
            self.kube.replace_secret(&secret).await?;
            debug!(secret = %name, "Repaired backup credentials labels");
        }
        Ok(())
    }

    /// Declare the plugins of every backup strategy so switching strategy
    /// needs no new plugins. Returns true when the resource was updated.
    async fn merge_backup_plugins(&self, jenkins: &mut Jenkins) -> Result<bool> {
        let declared = PluginRequirementSet::from(jenkins.spec.master.plugins.clone());
        let mut merged = declared.clone();
        merged.merge(&plugins_required_by_all());
        if merged == declared {
            return Ok(false);
        }

        info!("Adding plugins required by backup strategies");
        jenkins.spec.master.plugins = merged.into_map();
        *jenkins = self.kube.replace_jenkins(jenkins).await?;
        Ok(true)
    }

    /// The running master pod, or None when it was just created or deleted
    async fn ensure_master_pod(&self, jenkins: &mut Jenkins) -> Result<Option<Pod>> {
        let namespace = jenkins.namespace().unwrap_or_default();
        let name = resource_name(jenkins);

        let Some(pod) = self.kube.get_pod(&namespace, &name).await? else {
            info!(pod = %name, "Creating master pod");
            self.kube.create_pod(&master_pod(jenkins)).await?;
            // a new master starts without configuration or job history
            jenkins.status = Some(JenkinsStatus::default());
            self.store.update_status(jenkins).await?;
            return Ok(None);
        };

        if pod.metadata.deletion_timestamp.is_some() {
            debug!(pod = %name, "Master pod is terminating");
            return Ok(None);
        }

        if let Some(reason) = recreate_reason(jenkins, &pod) {
            info!(pod = %name, %reason, "Recreating master pod");
            self.kube.delete_pod(&namespace, &name).await?;
            return Ok(None);
        }

        Ok(Some(pod))
    }

    async fn delete_master_pod(&self, jenkins: &Jenkins) -> Result<()> {
        let namespace = jenkins.namespace().unwrap_or_default();
        self.kube.delete_pod(&namespace, &resource_name(jenkins)).await
    }

    /// Client authenticated with the operator's API token, generating the
    /// token when it is missing or predates the current pod.
    async fn ensure_jenkins_client(
        &self,
        jenkins: &Jenkins,
        pod: &Pod,
    ) -> Result<Arc<dyn JenkinsApi>> {
        let namespace = jenkins.namespace().unwrap_or_default();
        let url = api_url(&namespace, &resource_name(jenkins), HTTP_PORT, self.options.local);
        let secret_name = operator_credentials_secret_name(jenkins);

        let mut secret = self
            .kube
            .get_secret(&namespace, &secret_name)
            .await?
            .ok_or_else(|| Error::missing_resource(format!("secret '{secret_name}'")))?;
        let user = secret_value(&secret, USER_NAME_KEY)?;

        let pod_created = pod.metadata.creation_timestamp.as_ref().map(|t| t.0);
        if token_is_fresh(&secret, pod_created) {
            let token = secret_value(&secret, TOKEN_KEY)?;
            return self.connector.connect(&url, &user, &token);
        }

        info!(user = %user, "Generating Jenkins API token");
        let password = secret_value(&secret, PASSWORD_KEY)?;
        let token = self
            .connector
            .connect(&url, &user, &password)?
            .generate_token(&user, TOKEN_NAME)
            .await?;

        let data = secret.data.get_or_insert_with(BTreeMap::new);
        data.insert(TOKEN_KEY.to_string(), ByteString(token.clone().into_bytes()));
        data.insert(
            TOKEN_CREATION_TIME_KEY.to_string(),
            ByteString(Utc::now().to_rfc3339().into_bytes()),
        );
        self.kube.replace_secret(&secret).await?;

        self.connector.connect(&url, &user, &token)
    }

    async fn plugins_installed(&self, api: &dyn JenkinsApi) -> Result<bool> {
        let installed = api.installed_plugins().await?;
        Ok(plugins::verify_installed(
            &installed,
            &[&base_plugins(), &plugins_required_by_all()],
        ))
    }

    async fn ensure_base_configuration(
        &self,
        api: &dyn JenkinsApi,
        jenkins: &mut Jenkins,
    ) -> Result<Progress> {
        let scripts = base_configuration_config_map(jenkins)?
            .data
            .unwrap_or_default();
        let job = ScriptJob::new(BASE_CONFIGURATION_JOB_NAME, BASE_CONFIGURATION_PATH);
        job.configure(api).await?;

        let executor = self.options.executor(api, self.store);
        let result = job.ensure(&executor, jenkins, &scripts).await;
        Progress::from_job(BASE_CONFIGURATION_JOB_NAME, result, None)
    }
}

fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    let value = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::missing_resource(format!("key '{key}' in secret '{}'", secret.name_any()))
        })?;
    String::from_utf8(value.0.clone())
        .map_err(|_| Error::validation(format!("key '{key}' of secret '{}' is not UTF-8", secret.name_any())))
}

/// A token is usable when it exists and was generated after the pod it
/// authenticates against was created.
fn token_is_fresh(secret: &Secret, pod_created: Option<DateTime<Utc>>) -> bool {
    let data = secret.data.as_ref();
    let has_token = data
        .and_then(|d| d.get(TOKEN_KEY))
        .is_some_and(|t| !t.0.is_empty());
    let created = data
        .and_then(|d| d.get(TOKEN_CREATION_TIME_KEY))
        .and_then(|t| std::str::from_utf8(&t.0).ok())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    match (has_token, created, pod_created) {
        (true, Some(created), Some(pod_created)) => created >= pod_created,
        (true, Some(_), None) => true,
        _ => false,
    }
}

fn is_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .container_statuses
        .as_ref()
        .is_some_and(|c| !c.is_empty() && c.iter().all(|c| c.ready))
}

/// Why the running pod no longer matches the resource, if it doesn't
fn recreate_reason(jenkins: &Jenkins, pod: &Pod) -> Option<String> {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if let Some(phase @ ("Failed" | "Succeeded" | "Unknown")) = phase {
        return Some(format!("pod phase is {phase}"));
    }

    let master = &jenkins.spec.master;
    let container = pod.spec.as_ref().and_then(|s| s.containers.first());

    let image = container.and_then(|c| c.image.as_deref()).unwrap_or_default();
    if image != master.image {
        return Some(format!("image changed from '{image}' to '{}'", master.image));
    }

    let annotations = pod.annotations();
    if master
        .master_annotations
        .iter()
        .any(|(k, v)| annotations.get(k) != Some(v))
    {
        return Some("annotations changed".to_string());
    }

    let resources = container.and_then(|c| c.resources.as_ref());
    if !same_resources(resources, master.resources.as_ref()) {
        return Some("resources changed".to_string());
    }
    None
}

fn same_resources(
    actual: Option<&ResourceRequirements>,
    wanted: Option<&ResourceRequirements>,
) -> bool {
    let requests = |r: Option<&ResourceRequirements>| r.and_then(|r| r.requests.clone()).unwrap_or_default();
    let limits = |r: Option<&ResourceRequirements>| r.and_then(|r| r.limits.clone()).unwrap_or_default();
    requests(actual) == requests(wanted) && limits(actual) == limits(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::JOB_REQUEUE;
    use crate::controller::MockKubeClient;
    use crate::jenkins::{MockJenkinsApi, MockJenkinsConnector};
    use crate::jobs::MockStatusStore;
    use crate::plugins::InstalledPlugin;
    use crate::resources::test_fixtures::jenkins;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use mockall::predicate::eq;
    use rstest::rstest;

    fn secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn running_pod(jenkins: &Jenkins, ready: bool) -> Pod {
        let mut pod = master_pod(jenkins);
        pod.metadata.creation_timestamp = Some(Time(Utc::now() - chrono::Duration::hours(1)));
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "jenkins-master".to_string(),
                ready,
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod
    }

    /// Kube client where every resource of the base phase already exists
    fn provisioned_kube() -> MockKubeClient {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret().returning(|_, name| {
            let mut secret = if name.starts_with("jenkins-operator-credentials-") {
                secret(&[
                    (USER_NAME_KEY, "jenkins-operator"),
                    (PASSWORD_KEY, "pa55word"),
                    (TOKEN_KEY, "t0ken"),
                    (TOKEN_CREATION_TIME_KEY, &Utc::now().to_rfc3339()),
                ])
            } else {
                Secret::default()
            };
            secret.metadata.name = Some(name.to_string());
            secret.metadata.labels = Some(watched_labels(&jenkins("example")));
            Ok(Some(secret))
        });
        kube.expect_get_config_map()
            .returning(|_, _| Ok(Some(Default::default())));
        kube.expect_apply_config_map().returning(|_| Ok(()));
        kube.expect_apply_service_account().returning(|_| Ok(()));
        kube.expect_apply_role().returning(|_| Ok(()));
        kube.expect_apply_role_binding().returning(|_| Ok(()));
        kube.expect_apply_service().returning(|_| Ok(()));
        kube
    }

    /// A resource whose plugins already include every backup strategy's
    fn merged_jenkins() -> Jenkins {
        let mut jenkins = jenkins("example");
        let mut plugins = PluginRequirementSet::from(jenkins.spec.master.plugins.clone());
        plugins.merge(&plugins_required_by_all());
        jenkins.spec.master.plugins = plugins.into_map();
        jenkins
    }

    fn all_plugins_installed() -> Vec<InstalledPlugin> {
        base_plugins()
            .identifiers()
            .chain(plugins_required_by_all().identifiers())
            .map(|id| InstalledPlugin {
                short_name: id.split(':').next().unwrap_or_default().to_string(),
                version: "1".to_string(),
                active: true,
                enabled: true,
                deleted: false,
            })
            .collect()
    }

    mod validation {
        use super::*;

        #[rstest]
        #[case("jenkins/jenkins:lts")]
        #[case("jenkins/jenkins")]
        #[case("registry.example.com:5000/ci/jenkins:2.150.1-alpine")]
        #[case("jenkins/jenkins@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")]
        fn accepts_image_references(#[case] image: &str) {
            assert!(IMAGE_REFERENCE.is_match(image), "{image}");
        }

        #[rstest]
        #[case("Jenkins/Jenkins")]
        #[case("jenkins:")]
        #[case("jenkins jenkins")]
        #[case("/jenkins")]
        fn rejects_malformed_images(#[case] image: &str) {
            assert!(!IMAGE_REFERENCE.is_match(image), "{image}");
        }

        #[tokio::test]
        async fn defaulted_resource_is_valid() {
            let kube = MockKubeClient::new();
            let problems = validate(&kube, &jenkins("example")).await.unwrap();
            assert!(problems.is_empty(), "{problems:?}");
        }

        #[tokio::test]
        async fn every_problem_is_reported() {
            let mut jenkins = jenkins("example");
            jenkins.spec.master.image = "Not An Image".to_string();
            jenkins.spec.backup = "Tape".to_string();
            jenkins
                .spec
                .master
                .plugins
                .insert("broken".to_string(), vec![]);
            let kube = MockKubeClient::new();

            let problems = validate(&kube, &jenkins).await.unwrap();

            assert_eq!(problems.len(), 3, "{problems:?}");
            assert!(problems[0].contains("not a valid image"));
            assert!(problems[1].contains("broken"));
            assert!(problems[2].contains("Tape"));
        }

        #[test]
        fn conflicting_plugin_versions_are_invalid() {
            let declared = BTreeMap::from([
                ("a:1.0".to_string(), vec!["shared:0.1".to_string()]),
                ("b:1.0".to_string(), vec!["shared:0.2".to_string()]),
            ]);
            let problems = validate_plugins(&declared);
            assert_eq!(problems.len(), 1);
            assert!(problems[0].contains("conflicting"));
        }

        /// Story: S3 backups are configured but the user hasn't created the
        /// credentials secret or filled in the bucket yet.
        #[tokio::test]
        async fn s3_needs_secret_and_settings() {
            let mut jenkins = jenkins("example");
            jenkins.spec.backup = "AmazonS3".to_string();
            let mut kube = MockKubeClient::new();
            kube.expect_get_secret()
                .with(eq("ci"), eq("jenkins-operator-backup-credentials-example"))
                .returning(|_, _| Ok(None));

            let problems = validate(&kube, &jenkins).await.unwrap();

            assert_eq!(problems.len(), 2, "{problems:?}");
            assert!(problems[0].starts_with("create secret 'jenkins-operator-backup-credentials-example'"));
            assert!(problems[1].contains("incomplete"));
        }
    }

    mod pod_checks {
        use super::*;

        #[test]
        fn matching_pod_is_kept() {
            let jenkins = jenkins("example");
            assert_eq!(recreate_reason(&jenkins, &running_pod(&jenkins, true)), None);
        }

        #[rstest]
        #[case("Failed")]
        #[case("Succeeded")]
        #[case("Unknown")]
        fn finished_pods_are_recreated(#[case] phase: &str) {
            let jenkins = jenkins("example");
            let mut pod = running_pod(&jenkins, false);
            pod.status.as_mut().unwrap().phase = Some(phase.to_string());
            assert!(recreate_reason(&jenkins, &pod).unwrap().contains(phase));
        }

        #[test]
        fn spec_changes_recreate_the_pod() {
            let jenkins = jenkins("example");
            let pod = running_pod(&jenkins, true);

            let mut image = jenkins.clone();
            image.spec.master.image = "jenkins/jenkins:2.150".to_string();
            assert!(recreate_reason(&image, &pod).unwrap().contains("image"));

            let mut annotated = jenkins.clone();
            annotated
                .spec
                .master
                .master_annotations
                .insert("team".to_string(), "ci".to_string());
            assert_eq!(recreate_reason(&annotated, &pod).as_deref(), Some("annotations changed"));

            let mut resized = jenkins.clone();
            resized.spec.master.resources = None;
            assert_eq!(recreate_reason(&resized, &pod).as_deref(), Some("resources changed"));
        }

        #[test]
        fn readiness_needs_running_phase_and_ready_containers() {
            let jenkins = jenkins("example");
            assert!(is_ready(&running_pod(&jenkins, true)));
            assert!(!is_ready(&running_pod(&jenkins, false)));
            assert!(!is_ready(&master_pod(&jenkins)));
        }
    }

    mod tokens {
        use super::*;

        #[test]
        fn token_newer_than_pod_is_fresh() {
            let now = Utc::now();
            let secret = secret(&[(TOKEN_KEY, "t"), (TOKEN_CREATION_TIME_KEY, &now.to_rfc3339())]);
            assert!(token_is_fresh(&secret, Some(now - chrono::Duration::minutes(5))));
            assert!(!token_is_fresh(&secret, Some(now + chrono::Duration::minutes(5))));
        }

        #[test]
        fn missing_or_garbled_token_is_stale() {
            let now = Utc::now().to_rfc3339();
            assert!(!token_is_fresh(&secret(&[(TOKEN_CREATION_TIME_KEY, &now)]), None));
            assert!(!token_is_fresh(&secret(&[(TOKEN_KEY, "t"), (TOKEN_CREATION_TIME_KEY, "yesterday")]), None));
            assert!(!token_is_fresh(&secret(&[(TOKEN_KEY, ""), (TOKEN_CREATION_TIME_KEY, &now)]), None));
        }
    }

    mod reconcile {
        use super::*;

        /// Story: a brand new resource. Resources are created, the pod is
        /// created, the status is reset and the phase waits for the pod.
        #[tokio::test]
        async fn first_pass_creates_everything_and_waits_for_the_pod() {
            let mut jenkins = merged_jenkins();
            let mut kube = MockKubeClient::new();
            kube.expect_get_secret().returning(|_, _| Ok(None));
            kube.expect_create_secret().times(2).returning(|_| Ok(()));
            kube.expect_get_config_map().returning(|_, _| Ok(None));
            kube.expect_create_config_map().times(1).returning(|_| Ok(()));
            kube.expect_apply_config_map().times(3).returning(|_| Ok(()));
            kube.expect_apply_service_account().times(1).returning(|_| Ok(()));
            kube.expect_apply_role().times(1).returning(|_| Ok(()));
            kube.expect_apply_role_binding().times(1).returning(|_| Ok(()));
            kube.expect_apply_service().times(1).returning(|_| Ok(()));
            kube.expect_get_pod().returning(|_, _| Ok(None));
            kube.expect_create_pod().times(1).returning(|_| Ok(()));
            let mut store = MockStatusStore::new();
            store
                .expect_update_status()
                .withf(|j| j.status == Some(JenkinsStatus::default()))
                .times(1)
                .returning(|_| Ok(()));
            let connector = MockJenkinsConnector::new();
            let options = ReconcileOptions::default();

            let outcome = BaseReconciler::new(&kube, &connector, &store, &options)
                .reconcile(&mut jenkins)
                .await
                .unwrap();

            assert!(matches!(
                outcome,
                BaseOutcome::Pending(Progress::Requeue(d)) if d == POD_REQUEUE
            ));
        }

        /// Story: the resource predates the S3 strategy plugins, so they are
        /// declared on the resource and the pass ends there.
        #[tokio::test]
        async fn backup_plugins_are_merged_into_the_resource() {
            let mut jenkins = jenkins("example");
            let mut kube = provisioned_kube();
            kube.expect_replace_jenkins()
                .withf(|j| j.spec.master.plugins.keys().any(|k| k.starts_with("aws-java-sdk:")))
                .times(1)
                .returning(|j| Ok(j.clone()));
            let store = MockStatusStore::new();
            let connector = MockJenkinsConnector::new();
            let options = ReconcileOptions::default();

            let outcome = BaseReconciler::new(&kube, &connector, &store, &options)
                .reconcile(&mut jenkins)
                .await
                .unwrap();

            assert!(matches!(outcome, BaseOutcome::Pending(Progress::Requeue(d)) if d == UPDATE_REQUEUE));
        }

        #[tokio::test]
        async fn unready_pod_requeues_after_five_seconds() {
            let mut jenkins = merged_jenkins();
            let pod = running_pod(&jenkins, false);
            let mut kube = provisioned_kube();
            kube.expect_get_pod().returning(move |_, _| Ok(Some(pod.clone())));
            let store = MockStatusStore::new();
            let connector = MockJenkinsConnector::new();
            let options = ReconcileOptions::default();

            let outcome = BaseReconciler::new(&kube, &connector, &store, &options)
                .reconcile(&mut jenkins)
                .await
                .unwrap();

            assert!(matches!(outcome, BaseOutcome::Pending(Progress::Requeue(d)) if d == POD_REQUEUE));
        }

        /// Story: the master came up without the plugins the operator needs,
        /// so it is restarted to install them.
        #[tokio::test]
        async fn missing_plugins_restart_the_master() {
            let mut jenkins = merged_jenkins();
            let pod = running_pod(&jenkins, true);
            let mut kube = provisioned_kube();
            kube.expect_get_pod().returning(move |_, _| Ok(Some(pod.clone())));
            kube.expect_delete_pod()
                .with(eq("ci"), eq("jenkins-operator-example"))
                .times(1)
                .returning(|_, _| Ok(()));
            let mut connector = MockJenkinsConnector::new();
            connector
                .expect_connect()
                .with(eq("http://jenkins-operator-example.ci.svc.cluster.local:8080"), eq("jenkins-operator"), eq("t0ken"))
                .returning(|_, _, _| {
                    let mut api = MockJenkinsApi::new();
                    api.expect_installed_plugins().returning(|| Ok(vec![]));
                    Ok(Arc::new(api) as Arc<dyn JenkinsApi>)
                });
            let store = MockStatusStore::new();
            let options = ReconcileOptions::default();

            let outcome = BaseReconciler::new(&kube, &connector, &store, &options)
                .reconcile(&mut jenkins)
                .await
                .unwrap();

            assert!(matches!(outcome, BaseOutcome::Pending(Progress::Requeue(d)) if d == POD_REQUEUE));
        }

        /// Story: the master is up with every plugin; the base scripts job
        /// is installed and submitted.
        #[tokio::test]
        async fn ready_master_runs_the_base_configuration_job() {
            let mut jenkins = merged_jenkins();
            let pod = running_pod(&jenkins, true);
            let mut kube = provisioned_kube();
            kube.expect_get_pod().returning(move |_, _| Ok(Some(pod.clone())));
            let mut connector = MockJenkinsConnector::new();
            connector.expect_connect().returning(|_, _, _| {
                let mut api = MockJenkinsApi::new();
                api.expect_installed_plugins()
                    .returning(|| Ok(all_plugins_installed()));
                api.expect_create_or_update_job()
                    .withf(|_, job| job == BASE_CONFIGURATION_JOB_NAME)
                    .times(1)
                    .returning(|_, _| Ok(true));
                api.expect_build_job()
                    .withf(|job, _| job == BASE_CONFIGURATION_JOB_NAME)
                    .times(1)
                    .returning(|_, _| Ok(1));
                Ok(Arc::new(api) as Arc<dyn JenkinsApi>)
            });
            let mut store = MockStatusStore::new();
            store.expect_update_status().times(1).returning(|_| Ok(()));
            let options = ReconcileOptions::default();

            let outcome = BaseReconciler::new(&kube, &connector, &store, &options)
                .reconcile(&mut jenkins)
                .await
                .unwrap();

            assert!(matches!(
                outcome,
                BaseOutcome::Pending(Progress::Requeue(d)) if d == JOB_REQUEUE
            ));
        }

        /// Story: the token predates the pod, so a new one is generated with
        /// the password and stored before connecting with it.
        #[tokio::test]
        async fn stale_token_is_regenerated() {
            let jenkins = merged_jenkins();
            let pod = running_pod(&jenkins, true);
            let mut kube = MockKubeClient::new();
            kube.expect_get_secret().returning(|_, _| {
                Ok(Some(secret(&[
                    (USER_NAME_KEY, "jenkins-operator"),
                    (PASSWORD_KEY, "pa55word"),
                    (TOKEN_KEY, "old"),
                    (TOKEN_CREATION_TIME_KEY, "2000-01-01T00:00:00Z"),
                ])))
            });
            kube.expect_replace_secret()
                .withf(|s| s.data.as_ref().is_some_and(|d| d[TOKEN_KEY].0 == b"new"))
                .times(1)
                .returning(|s| Ok(s.clone()));
            let mut connector = MockJenkinsConnector::new();
            connector
                .expect_connect()
                .withf(|_, _, secret| secret == "pa55word")
                .times(1)
                .returning(|_, _, _| {
                    let mut api = MockJenkinsApi::new();
                    api.expect_generate_token()
                        .returning(|_, _| Ok("new".to_string()));
                    Ok(Arc::new(api) as Arc<dyn JenkinsApi>)
                });
            connector
                .expect_connect()
                .withf(|_, _, secret| secret == "new")
                .times(1)
                .returning(|_, _, _| Ok(Arc::new(MockJenkinsApi::new()) as Arc<dyn JenkinsApi>));
            let store = MockStatusStore::new();
            let options = ReconcileOptions::default();

            BaseReconciler::new(&kube, &connector, &store, &options)
                .ensure_jenkins_client(&jenkins, &pod)
                .await
                .unwrap();
        }
    }
}

//! Kubernetes resources owned by a Jenkins master
//!
//! Deterministic builders for the objects the base phase applies: config
//! maps with scripts, credentials secrets, the master pod, its service and
//! RBAC. Names and labels are derived from the custom resource name so the
//! controller can map watched objects back to their owner.

mod configmaps;
mod pod;
mod rbac;
mod secrets;
mod service;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::Jenkins;

pub use configmaps::{
    base_configuration_config_map, init_configuration_config_map, scripts_config_map,
    user_configuration_config_map,
};
pub use pod::{master_pod, BACKUP_SCRIPT_NAME, INIT_SCRIPT_NAME, MASTER_CONTAINER_NAME};
pub use rbac::{role, role_binding, service_account};
pub use secrets::{
    backup_credentials_secret, generate_password, operator_credentials_secret, OPERATOR_USER_NAME,
    PASSWORD_KEY, PASSWORD_LENGTH, TOKEN_CREATION_TIME_KEY, TOKEN_KEY, USER_NAME_KEY,
};
pub use service::master_service;

/// Name used for labels, job names and resource prefixes
pub const OPERATOR_NAME: &str = "jenkins-operator";

/// Label key identifying objects managed by the operator
pub const LABEL_APP: &str = "app";
/// Label key marking objects whose changes trigger a reconcile
pub const LABEL_WATCH: &str = "watch";
/// Label key holding the owning Jenkins resource name
pub const LABEL_JENKINS_CR: &str = "jenkins-cr";

/// Jenkins HTTP port
pub const HTTP_PORT: u16 = 8080;
/// JNLP agent port
pub const SLAVE_PORT: u16 = 50000;

/// Jenkins home inside the master container
pub const JENKINS_HOME_PATH: &str = "/var/jenkins/home";
/// Mount path of the scripts config map
pub const SCRIPTS_PATH: &str = "/var/jenkins/scripts";
/// Mount path of the operator credentials secret
pub const OPERATOR_CREDENTIALS_PATH: &str = "/var/jenkins/operator-credentials";
/// Mount path of the init configuration config map
pub const INIT_CONFIGURATION_PATH: &str = "/var/jenkins/init-configuration";
/// Mount path of the base configuration config map
pub const BASE_CONFIGURATION_PATH: &str = "/var/jenkins/base-configuration";
/// Mount path of the user configuration config map
pub const USER_CONFIGURATION_PATH: &str = "/var/jenkins/user-configuration";
/// Mount path of the backup credentials secret
pub const BACKUP_CREDENTIALS_PATH: &str = "/var/jenkins/backup-credentials";

/// Suffix of the job DSL seed job created for every seed repository
pub const SEED_JOB_SUFFIX: &str = "job-dsl-seed";

/// Name shared by the pod, service, service account and RBAC objects
pub fn resource_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-{}", jenkins.name_any())
}

/// Secret holding the operator user's password and API token
pub fn operator_credentials_secret_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-credentials-{}", jenkins.name_any())
}

/// Secret holding credentials used by the backup strategy
pub fn backup_credentials_secret_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-backup-credentials-{}", jenkins.name_any())
}

/// Config map with the entrypoint, plugin install and backup scripts
pub fn scripts_config_map_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-scripts-{}", jenkins.name_any())
}

/// Config map with scripts run once at Jenkins startup
pub fn init_configuration_config_map_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-init-configuration-{}", jenkins.name_any())
}

/// Config map with the operator's base configuration scripts
pub fn base_configuration_config_map_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-base-configuration-{}", jenkins.name_any())
}

/// Config map with user-supplied configuration scripts
pub fn user_configuration_config_map_name(jenkins: &Jenkins) -> String {
    format!("{OPERATOR_NAME}-user-configuration-{}", jenkins.name_any())
}

/// Labels put on every object owned by `jenkins`
pub fn labels(jenkins: &Jenkins) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_JENKINS_CR.to_string(), jenkins.name_any()),
    ])
}

/// Labels for user-editable objects whose changes trigger a reconcile
pub fn watched_labels(jenkins: &Jenkins) -> BTreeMap<String, String> {
    let mut labels = labels(jenkins);
    labels.insert(LABEL_WATCH.to_string(), "true".to_string());
    labels
}

/// Metadata for an object owned by `jenkins`: its namespace, the given
/// labels and a controller owner reference so deleting the Jenkins resource
/// garbage-collects it.
pub fn object_meta(
    jenkins: &Jenkins,
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: jenkins.namespace(),
        labels: Some(labels),
        owner_references: jenkins.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// Jenkins resource name that a watched object's labels point at, if the
/// object is one the operator watches
pub fn watched_owner(object_labels: &BTreeMap<String, String>) -> Option<String> {
    let is_ours = object_labels.get(LABEL_APP).map(String::as_str) == Some(OPERATOR_NAME);
    let is_watched = object_labels.get(LABEL_WATCH).map(String::as_str) == Some("true");
    if is_ours && is_watched {
        object_labels.get(LABEL_JENKINS_CR).cloned()
    } else {
        None
    }
}

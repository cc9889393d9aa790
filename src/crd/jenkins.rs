//! Jenkins Custom Resource Definition
//!
//! A Jenkins resource describes one Jenkins master: its image and plugins,
//! the seed jobs that generate pipelines from git repositories, and how job
//! history is backed up. Its status carries the build ledger, the only
//! durable state of the job engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::build::BuildLedger;
use crate::plugins::base_plugins;

/// Image used when `spec.master.image` is empty
pub const DEFAULT_MASTER_IMAGE: &str = "jenkins/jenkins:lts";

/// Backup strategy tag used when `spec.backup` is empty
pub const DEFAULT_BACKUP: &str = "NoBackup";

/// Specification for a Jenkins master
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "jenkins.io",
    version = "v1alpha1",
    kind = "Jenkins",
    plural = "jenkins",
    shortname = "jk",
    status = "JenkinsStatus",
    namespaced,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.master.image"}"#,
    printcolumn = r#"{"name":"Backup","type":"string","jsonPath":".spec.backup"}"#,
    printcolumn = r#"{"name":"Base","type":"date","jsonPath":".status.baseConfigurationCompletedTime"}"#,
    printcolumn = r#"{"name":"User","type":"date","jsonPath":".status.userConfigurationCompletedTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsSpec {
    /// Backup strategy tag: `NoBackup` or `AmazonS3`
    #[serde(default)]
    pub backup: String,

    /// Settings for the `AmazonS3` backup strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_amazon_s3: Option<AmazonS3BackupSpec>,

    /// Master pod settings
    #[serde(default)]
    pub master: MasterSpec,

    /// Git repositories whose job definitions are loaded by seed jobs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed_jobs: Vec<SeedJob>,
}

/// Where the S3 backup strategy stores archives
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmazonS3BackupSpec {
    /// Bucket name
    #[serde(default)]
    pub bucket_name: String,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub bucket_path: String,
    /// AWS region of the bucket
    #[serde(default)]
    pub region: String,
}

/// Jenkins master pod settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MasterSpec {
    /// Container image
    #[serde(default)]
    pub image: String,

    /// Annotations put on the master pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub master_annotations: BTreeMap<String, String>,

    /// Compute resources of the master container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Plugins to install: `name:version` root mapped to its dependencies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Vec<String>>,
}

/// A git repository with job DSL definitions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedJob {
    /// Unique identifier, also the id of the deploy key credential
    #[serde(default)]
    pub id: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Ant-style pattern of job DSL files in the repository
    #[serde(default)]
    pub targets: String,

    /// Branch to check out
    #[serde(default)]
    pub repository_branch: String,

    /// Clone URL
    #[serde(default)]
    pub repository_url: String,

    /// Deploy key used to clone private repositories
    #[serde(default)]
    pub private_key: PrivateKey,
}

/// Source of a seed job deploy key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKey {
    /// Secret key holding the PEM-encoded private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// Reference to one key of a secret in the resource's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Key within the secret data
    pub key: String,
}

/// Observed state of a Jenkins master
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsStatus {
    /// Whether the one-time restore of job history has finished
    #[serde(default)]
    pub backup_restored: bool,

    /// When the base configuration phase first completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_configuration_completed_time: Option<DateTime<Utc>>,

    /// When the user configuration phase first completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_configuration_completed_time: Option<DateTime<Utc>>,

    /// Builds driven by the operator
    #[serde(default, skip_serializing_if = "BuildLedger::is_empty")]
    pub builds: BuildLedger,
}

impl Jenkins {
    /// Status, initialised to the default when absent
    pub fn status_mut(&mut self) -> &mut JenkinsStatus {
        self.status.get_or_insert_with(JenkinsStatus::default)
    }

    /// True once the base configuration phase has completed at least once
    pub fn base_configuration_completed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.base_configuration_completed_time.is_some())
    }

    /// True once the user configuration phase has completed at least once
    pub fn user_configuration_completed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.user_configuration_completed_time.is_some())
    }

    /// True once the restore job has completed
    pub fn backup_restored(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.backup_restored)
    }
}

fn quantity(value: &str) -> Quantity {
    Quantity(value.to_string())
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), quantity("1")),
            ("memory".to_string(), quantity("500Mi")),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), quantity("1500m")),
            ("memory".to_string(), quantity("3Gi")),
        ])),
        ..Default::default()
    }
}

fn has_cpu_and_memory(list: Option<&BTreeMap<String, Quantity>>) -> bool {
    list.is_some_and(|l| l.contains_key("cpu") && l.contains_key("memory"))
}

impl JenkinsSpec {
    /// Fill in defaults for the master image, backup strategy, plugins and
    /// resources. Returns true when anything changed.
    pub fn apply_defaults(&mut self) -> bool {
        let mut changed = false;

        if self.master.image.is_empty() {
            info!(image = DEFAULT_MASTER_IMAGE, "Setting default Jenkins master image");
            self.master.image = DEFAULT_MASTER_IMAGE.to_string();
            changed = true;
        }

        if self.backup.is_empty() {
            info!(backup = DEFAULT_BACKUP, "Setting default backup strategy");
            warn!("Backup is disabled, configure it in '.spec.backup'");
            self.backup = DEFAULT_BACKUP.to_string();
            changed = true;
        }

        if self.master.plugins.is_empty() {
            info!("Setting default base plugins");
            self.master.plugins = base_plugins().into_map();
            changed = true;
        }

        let resources_complete = self.master.resources.as_ref().is_some_and(|r| {
            has_cpu_and_memory(r.requests.as_ref()) && has_cpu_and_memory(r.limits.as_ref())
        });
        if !resources_complete {
            info!("Setting default Jenkins master pod resource requirements");
            self.master.resources = Some(default_resources());
            changed = true;
        }

        changed
    }
}

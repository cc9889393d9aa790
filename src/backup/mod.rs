//! Backup strategies for Jenkins job history
//!
//! A strategy is selected once by the tag in `spec.backup`. Each strategy
//! provides the backup and restore job definitions, validation for both
//! configuration phases and the plugins its jobs need.

mod s3;

use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use minijinja::context;
use tracing::warn;

use crate::crd::{Jenkins, JenkinsSpec};
use crate::plugins::PluginRequirementSet;
use crate::templates;
use crate::{Error, Result};

/// Job uploading job history, also triggered by the master's preStop hook
pub const BACKUP_JOB_NAME: &str = "jenkins-operator-backup";
/// Job restoring job history into a fresh master
pub const RESTORE_JOB_NAME: &str = "jenkins-operator-restore-backup";
/// Fixed fingerprint of the restore run, which happens once per resource
pub const RESTORE_HASH: &str = "hash-restore";

pub use s3::{ACCESS_KEY, LATEST_FILE, SECRET_KEY};

/// How job history is backed up and restored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupStrategy {
    /// Backups are disabled; the jobs exist but do nothing
    NoBackup,
    /// Archives are stored in an S3 bucket
    AmazonS3,
}

impl BackupStrategy {
    /// Every strategy the operator knows
    pub const ALL: [BackupStrategy; 2] = [BackupStrategy::NoBackup, BackupStrategy::AmazonS3];

    /// Select the strategy named by `spec.backup`
    pub fn from_tag(tag: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.tag() == tag)
            .ok_or_else(|| Error::validation(format!("invalid backup strategy '{tag}'")))
    }

    /// The tag used in `spec.backup`
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NoBackup => "NoBackup",
            Self::AmazonS3 => "AmazonS3",
        }
    }

    /// Job definition of [`BACKUP_JOB_NAME`]
    pub fn backup_job_definition(&self, jenkins: &Jenkins) -> Result<String> {
        match self {
            Self::NoBackup => no_backup_job(),
            Self::AmazonS3 => s3::backup_job(jenkins),
        }
    }

    /// Job definition of [`RESTORE_JOB_NAME`]
    pub fn restore_job_definition(&self, jenkins: &Jenkins) -> Result<String> {
        match self {
            Self::NoBackup => no_backup_job(),
            Self::AmazonS3 => s3::restore_job(jenkins),
        }
    }

    /// Checks done by the base phase on the declared configuration
    pub fn validate_config(&self, spec: &JenkinsSpec) -> bool {
        match self {
            Self::NoBackup => true,
            Self::AmazonS3 => s3::validate_config(spec),
        }
    }

    /// Checks done by the user phase on the backup credentials secret.
    ///
    /// `secret` is the backup credentials secret if it exists.
    pub fn validate_credentials(&self, secret: Option<&Secret>) -> Result<bool> {
        match self {
            Self::NoBackup => Ok(true),
            Self::AmazonS3 => s3::validate_credentials(secret),
        }
    }

    /// Plugins the strategy's jobs need on the master
    pub fn required_plugins(&self) -> PluginRequirementSet {
        match self {
            Self::NoBackup => PluginRequirementSet::new(),
            Self::AmazonS3 => s3::required_plugins(),
        }
    }
}

impl fmt::Display for BackupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Plugins of every strategy, so switching strategies needs no restart
pub fn plugins_required_by_all() -> PluginRequirementSet {
    let mut all = PluginRequirementSet::new();
    for strategy in BackupStrategy::ALL {
        all.merge(&strategy.required_plugins());
    }
    all
}

fn no_backup_job() -> Result<String> {
    templates::render(
        "no-backup.xml",
        templates::NO_BACKUP_JOB,
        context! {},
    )
}

fn require_key(secret: &Secret, key: &str) -> bool {
    let present = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .is_some_and(|v| !v.0.is_empty());
    if !present {
        warn!(
            secret = secret.metadata.name.as_deref().unwrap_or_default(),
            key, "Backup credentials secret is missing a key"
        );
        return false;
    }
    true
}

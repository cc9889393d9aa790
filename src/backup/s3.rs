//! Amazon S3 backup strategy

use k8s_openapi::api::core::v1::Secret;
use minijinja::context;
use tracing::warn;

use super::require_key;
use crate::crd::{Jenkins, JenkinsSpec};
use crate::plugins::{PluginRequirementSet, APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN, JACKSON2_API_PLUGIN};
use crate::resources::BACKUP_CREDENTIALS_PATH;
use crate::templates;
use crate::{Error, Result};

/// Backup credentials key holding the AWS access key id
pub const ACCESS_KEY: &str = "access-key";
/// Backup credentials key holding the AWS secret access key
pub const SECRET_KEY: &str = "secret-key";
/// Object the newest archive is copied to, and restored from
pub const LATEST_FILE: &str = "build-history-latest.tar.gz";

const AWS_JAVA_SDK_PLUGIN: &str = "aws-java-sdk:1.11.457";

fn render(name: &str, source: &str, jenkins: &Jenkins) -> Result<String> {
    let s3 = jenkins.spec.backup_amazon_s3.clone().unwrap_or_default();
    templates::render(
        name,
        source,
        context! {
            bucket_name => s3.bucket_name,
            bucket_path => s3.bucket_path.trim_end_matches('/'),
            region => s3.region,
            credentials_path => BACKUP_CREDENTIALS_PATH,
            access_key => ACCESS_KEY,
            secret_key => SECRET_KEY,
            latest_file => LATEST_FILE,
        },
    )
}

pub(super) fn backup_job(jenkins: &Jenkins) -> Result<String> {
    render("s3-backup.xml", templates::S3_BACKUP_JOB, jenkins)
}

pub(super) fn restore_job(jenkins: &Jenkins) -> Result<String> {
    render("s3-restore.xml", templates::S3_RESTORE_JOB, jenkins)
}

pub(super) fn validate_config(spec: &JenkinsSpec) -> bool {
    let s3 = spec.backup_amazon_s3.clone().unwrap_or_default();
    let required = [
        ("spec.backupAmazonS3.bucketName", &s3.bucket_name),
        ("spec.backupAmazonS3.bucketPath", &s3.bucket_path),
        ("spec.backupAmazonS3.region", &s3.region),
    ];

    let mut valid = true;
    for (field, value) in required {
        if value.is_empty() {
            warn!(field, "S3 backup setting is not set");
            valid = false;
        }
    }
    valid
}

pub(super) fn validate_credentials(secret: Option<&Secret>) -> Result<bool> {
    let secret = secret.ok_or_else(|| Error::missing_resource("backup credentials secret"))?;
    let access_key = require_key(secret, ACCESS_KEY);
    let secret_key = require_key(secret, SECRET_KEY);
    Ok(access_key && secret_key)
}

pub(super) fn required_plugins() -> PluginRequirementSet {
    PluginRequirementSet::new().with(
        AWS_JAVA_SDK_PLUGIN,
        &[APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN, JACKSON2_API_PLUGIN],
    )
}

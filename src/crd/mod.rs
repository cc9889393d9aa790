//! Custom Resource Definitions for the Jenkins operator

mod build;
mod jenkins;

pub use build::{Build, BuildLedger, BuildStatus};
pub use jenkins::{
    AmazonS3BackupSpec, Jenkins, JenkinsSpec, JenkinsStatus, MasterSpec, PrivateKey, SecretKeyRef,
    SeedJob, DEFAULT_BACKUP, DEFAULT_MASTER_IMAGE,
};

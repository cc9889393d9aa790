//! Restore and backup of job history
//!
//! Restore runs once per resource, before user configuration first
//! completes, under a constant fingerprint. Backup runs again whenever the
//! user configuration or the backup credentials change.

use kube::ResourceExt;
use tracing::{debug, info};

use super::Progress;
use crate::backup::{BackupStrategy, BACKUP_JOB_NAME, RESTORE_HASH, RESTORE_JOB_NAME};
use crate::controller::KubeClient;
use crate::crd::Jenkins;
use crate::fingerprint::{fingerprint_fields, fingerprint_map};
use crate::jobs::{JobExecutor, JobRequest};
use crate::resources::{backup_credentials_secret_name, user_configuration_config_map_name};
use crate::Result;

const BACKUP_HINT: &str = "check backup configuration and credentials";

/// Restore job history into a fresh master.
///
/// Skipped once restored or once user configuration has completed. On
/// success `status.backupRestored` is set and persisted.
pub async fn restore(
    executor: &JobExecutor<'_>,
    jenkins: &mut Jenkins,
    strategy: BackupStrategy,
) -> Result<Progress> {
    if jenkins.backup_restored() || jenkins.user_configuration_completed() {
        return Ok(Progress::Done);
    }

    let definition = strategy.restore_job_definition(jenkins)?;
    if executor
        .api()
        .create_or_update_job(&definition, RESTORE_JOB_NAME)
        .await?
    {
        info!(job = RESTORE_JOB_NAME, %strategy, "Created restore job");
    }

    let request = JobRequest::new(RESTORE_JOB_NAME, RESTORE_HASH).preserved();
    let result = executor.ensure_job(jenkins, &request).await;
    let progress = Progress::from_job(RESTORE_JOB_NAME, result, Some(BACKUP_HINT))?;

    if progress.is_done() {
        info!(%strategy, "Backup restored");
        jenkins.status_mut().backup_restored = true;
        executor.store().update_status(jenkins).await?;
    }
    Ok(progress)
}

/// Fingerprint of what a backup depends on: the strategy, the user
/// configuration and the backup credentials.
pub async fn backup_hash(
    kube: &dyn KubeClient,
    jenkins: &Jenkins,
    strategy: BackupStrategy,
) -> Result<String> {
    let namespace = jenkins.namespace().unwrap_or_default();
    let config = kube
        .get_config_map(&namespace, &user_configuration_config_map_name(jenkins))
        .await?
        .and_then(|cm| cm.data)
        .unwrap_or_default();
    let credentials = kube
        .get_secret(&namespace, &backup_credentials_secret_name(jenkins))
        .await?
        .and_then(|s| s.data)
        .unwrap_or_default();

    Ok(fingerprint_fields([
        strategy.tag().to_string(),
        fingerprint_map(&config),
        fingerprint_map(credentials.iter().map(|(k, v)| (k.as_str(), v.0.as_slice()))),
    ]))
}

/// Install the backup job and run it for the current configuration.
///
/// Records are preserved; once the current backup is done the records of
/// earlier configurations are pruned.
pub async fn backup(
    executor: &JobExecutor<'_>,
    kube: &dyn KubeClient,
    jenkins: &mut Jenkins,
    strategy: BackupStrategy,
) -> Result<Progress> {
    let definition = strategy.backup_job_definition(jenkins)?;
    if executor
        .api()
        .create_or_update_job(&definition, BACKUP_JOB_NAME)
        .await?
    {
        info!(job = BACKUP_JOB_NAME, %strategy, "Created backup job");
    }

    let hash = backup_hash(kube, jenkins, strategy).await?;
    let request = JobRequest::new(BACKUP_JOB_NAME, &hash).preserved();
    let result = executor.ensure_job(jenkins, &request).await;
    let progress = Progress::from_job(BACKUP_JOB_NAME, result, Some(BACKUP_HINT))?;

    if progress.is_done() {
        let pruned = jenkins
            .status_mut()
            .builds
            .prune_superseded(BACKUP_JOB_NAME, &hash);
        if pruned > 0 {
            debug!(pruned, "Pruned superseded backup builds");
            executor.store().update_status(jenkins).await?;
        }
    }
    Ok(progress)
}

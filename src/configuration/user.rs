//! User configuration phase
//!
//! Runs once the base phase is done: restores job history into a fresh
//! master, applies the user's groovy scripts, provisions seed jobs and backs
//! job history up. Steps run strictly in that order.

use std::collections::BTreeSet;

use aws_lc_rs::signature::RsaKeyPair;
use kube::ResourceExt;
use tracing::warn;
use x509_parser::pem::parse_x509_pem;

use super::{backup, seedjobs, Progress, ReconcileOptions, ScriptJob};
use crate::backup::BackupStrategy;
use crate::controller::KubeClient;
use crate::crd::Jenkins;
use crate::jenkins::JenkinsApi;
use crate::jobs::StatusStore;
use crate::resources::{
    backup_credentials_secret_name, user_configuration_config_map_name, USER_CONFIGURATION_PATH,
};
use crate::{Error, Result};

/// Script-sync job applying the user configuration scripts
pub const USER_CONFIGURATION_JOB_NAME: &str = "jenkins-operator-user-configuration";

const PEM_RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";

/// Check the parts of the resource the user phase depends on.
///
/// Returns one message per problem; an empty list means valid.
pub async fn validate(kube: &dyn KubeClient, jenkins: &Jenkins) -> Result<Vec<String>> {
    let namespace = jenkins.namespace().unwrap_or_default();
    let mut problems = Vec::new();
    let mut seen = BTreeSet::new();

    for seed_job in &jenkins.spec.seed_jobs {
        if seed_job.id.is_empty() {
            problems.push(format!(
                "seed job for '{}' has no id",
                seed_job.repository_url
            ));
            continue;
        }
        if !seen.insert(seed_job.id.as_str()) {
            problems.push(format!("seed job id '{}' is declared twice", seed_job.id));
        }

        let Some(key_ref) = &seed_job.private_key.secret_key_ref else {
            if seed_job.repository_url.starts_with("git@") {
                problems.push(format!(
                    "seed job '{}' clones over SSH but has no privateKey.secretKeyRef",
                    seed_job.id
                ));
            }
            continue;
        };

        let Some(secret) = kube.get_secret(&namespace, &key_ref.name).await? else {
            problems.push(format!(
                "secret '{}' of seed job '{}' not found",
                key_ref.name, seed_job.id
            ));
            continue;
        };
        match secret.data.as_ref().and_then(|d| d.get(&key_ref.key)) {
            None => problems.push(format!(
                "secret '{}' of seed job '{}' has no key '{}'",
                key_ref.name, seed_job.id, key_ref.key
            )),
            Some(pem) => {
                if let Err(reason) = validate_private_key(&pem.0) {
                    problems.push(format!(
                        "private key of seed job '{}' is invalid: {reason}",
                        seed_job.id
                    ));
                }
            }
        }
    }

    match BackupStrategy::from_tag(&jenkins.spec.backup) {
        Err(e) => problems.push(e.to_string()),
        Ok(strategy) => {
            let secret_name = backup_credentials_secret_name(jenkins);
            let secret = kube.get_secret(&namespace, &secret_name).await?;
            match strategy.validate_credentials(secret.as_ref()) {
                Ok(true) => {}
                Ok(false) => problems.push(format!(
                    "secret '{secret_name}' lacks credentials for {strategy} backups"
                )),
                Err(Error::MissingResource(_)) => problems.push(format!(
                    "create secret '{secret_name}' in namespace '{namespace}' with the {strategy} backup credentials"
                )),
                Err(e) => return Err(e),
            }
        }
    }

    for problem in &problems {
        warn!(jenkins = %jenkins.name_any(), %problem, "User configuration is invalid");
    }
    Ok(problems)
}

/// Check that `pem` holds a PKCS#1 PEM-encoded RSA private key
fn validate_private_key(pem: &[u8]) -> std::result::Result<(), String> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| format!("not PEM encoded: {e}"))?;
    if pem.label != PEM_RSA_PRIVATE_KEY {
        return Err(format!(
            "expected a '{PEM_RSA_PRIVATE_KEY}' block, found '{}'",
            pem.label
        ));
    }
    RsaKeyPair::from_der(&pem.contents).map_err(|e| format!("not an RSA private key: {e}"))?;
    Ok(())
}

/// Runs the user phase for one Jenkins resource
pub struct UserReconciler<'a> {
    kube: &'a dyn KubeClient,
    api: &'a dyn JenkinsApi,
    store: &'a dyn StatusStore,
    options: &'a ReconcileOptions,
}

impl<'a> UserReconciler<'a> {
    /// Reconciler talking to the master through `api`
    pub fn new(
        kube: &'a dyn KubeClient,
        api: &'a dyn JenkinsApi,
        store: &'a dyn StatusStore,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            kube,
            api,
            store,
            options,
        }
    }

    /// Drive the user phase one step further
    pub async fn reconcile(&self, jenkins: &mut Jenkins) -> Result<Progress> {
        let strategy = BackupStrategy::from_tag(&jenkins.spec.backup)?;
        let executor = self.options.executor(self.api, self.store);

        let progress = backup::restore(&executor, jenkins, strategy).await?;
        if !progress.is_done() {
            return Ok(progress);
        }

        let progress = self.ensure_user_configuration(jenkins).await?;
        if !progress.is_done() {
            return Ok(progress);
        }

        seedjobs::configure(self.api).await?;
        let result = seedjobs::ensure(&executor, self.kube, jenkins).await;
        let progress = Progress::from_job(
            seedjobs::CONFIGURE_SEED_JOB_NAME,
            result,
            Some("check the seed job repositories and deploy keys"),
        )?;
        if !progress.is_done() {
            return Ok(progress);
        }

        backup::backup(&executor, self.kube, jenkins, strategy).await
    }

    async fn ensure_user_configuration(&self, jenkins: &mut Jenkins) -> Result<Progress> {
        let namespace = jenkins.namespace().unwrap_or_default();
        let name = user_configuration_config_map_name(jenkins);
        let scripts = self
            .kube
            .get_config_map(&namespace, &name)
            .await?
            .ok_or_else(|| Error::missing_resource(format!("config map '{name}'")))?
            .data
            .unwrap_or_default();

        let job = ScriptJob::new(USER_CONFIGURATION_JOB_NAME, USER_CONFIGURATION_PATH);
        job.configure(self.api).await?;

        let executor = self.options.executor(self.api, self.store);
        let result = job.ensure(&executor, jenkins, &scripts).await;
        Progress::from_job(USER_CONFIGURATION_JOB_NAME, result, None)
    }
}

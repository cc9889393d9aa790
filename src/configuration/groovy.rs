//! Script-sync jobs
//!
//! A script-sync job loads every groovy script of a mounted config map. The
//! build carries the fingerprint of the scripts it must load and waits until
//! the mount matches it, so a build never runs stale scripts.

use std::collections::BTreeMap;

use minijinja::context;
use tracing::{debug, info, warn};

use crate::crd::{BuildStatus, Jenkins};
use crate::fingerprint::fingerprint_map;
use crate::jenkins::JenkinsApi;
use crate::jobs::{JobExecutor, JobRequest};
use crate::templates;
use crate::{Error, Result};

/// Build parameter carrying the scripts fingerprint
pub const HASH_PARAMETER: &str = "SOURCE_CODE_HASH";

/// A job applying the groovy scripts mounted at `scripts_path`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptJob {
    job_name: String,
    scripts_path: String,
}

impl ScriptJob {
    /// Job `job_name` loading scripts from `scripts_path` on the master
    pub fn new(job_name: impl Into<String>, scripts_path: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            scripts_path: scripts_path.into(),
        }
    }

    /// Jenkins job name
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// The job's config.xml
    pub fn definition(&self) -> Result<String> {
        templates::render(
            "script-sync.xml",
            templates::SCRIPT_SYNC_JOB,
            context! {
                scripts_path => &self.scripts_path,
                hash_parameter => HASH_PARAMETER,
            },
        )
    }

    /// Create or overwrite the job definition on the master
    pub async fn configure(&self, api: &dyn JenkinsApi) -> Result<()> {
        let created = api
            .create_or_update_job(&self.definition()?, &self.job_name)
            .await?;
        if created {
            info!(job = %self.job_name, "Created script-sync job");
        } else {
            debug!(job = %self.job_name, "Updated script-sync job");
        }
        Ok(())
    }

    /// Ensure the scripts in `data` have been applied.
    ///
    /// `data` is the content of the config map mounted at `scripts_path`.
    /// The record is preserved so unchanged scripts are not applied again;
    /// records for older script versions are pruned once this one is done.
    /// A build stopped for exceeding the maximum run age did not apply the
    /// scripts, so it fails the job with [`Error::Unrecoverable`] until the
    /// scripts change.
    pub async fn ensure(
        &self,
        executor: &JobExecutor<'_>,
        jenkins: &mut Jenkins,
        data: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let hash = fingerprint_map(data);
        let request = JobRequest::new(&self.job_name, &hash)
            .with_parameters(BTreeMap::from([(HASH_PARAMETER.to_string(), hash.clone())]))
            .preserved();

        let done = executor.ensure_job(jenkins, &request).await?;
        if !done {
            return Ok(false);
        }

        let pruned = jenkins
            .status_mut()
            .builds
            .prune_superseded(&self.job_name, &hash);
        if pruned > 0 {
            debug!(job = %self.job_name, pruned, "Pruned superseded script builds");
            executor.store().update_status(jenkins).await?;
        }

        let expired = jenkins
            .status
            .as_ref()
            .and_then(|s| s.builds.find(&self.job_name, &hash))
            .is_some_and(|b| b.status == BuildStatus::Expired);
        if expired {
            warn!(job = %self.job_name, "Scripts were not applied, the build was stopped after exceeding its maximum run age");
            return Err(Error::Unrecoverable {
                job: self.job_name.clone(),
            });
        }
        Ok(true)
    }
}

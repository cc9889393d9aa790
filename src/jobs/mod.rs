//! Job execution engine
//!
//! [`JobExecutor::ensure_job`] drives one Jenkins job, keyed by a content
//! fingerprint, towards completion. Each call performs at most one
//! submission or one poll (plus a stop for expired builds), writes every
//! transition through a [`StatusStore`] and returns whether the job is done.
//! Retries happen across reconcile invocations, never in-process, so a
//! restarted operator resumes from the persisted ledger.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{Build, BuildStatus, Jenkins};
use crate::jenkins::JenkinsApi;
use crate::{Error, Result};

/// Resubmissions allowed after the first failed build
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Writes the status of a Jenkins resource back to the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Persist `jenkins.status`.
    ///
    /// Implementations must reject stale writes with an error for which
    /// [`Error::is_conflict`] is true and refresh the resource version of
    /// `jenkins` on success.
    async fn update_status(&self, jenkins: &mut Jenkins) -> Result<()>;
}

/// One request to bring a job to completion for a given fingerprint
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    /// Jenkins job name
    pub job_name: String,
    /// Fingerprint of the content the build applies
    pub hash: String,
    /// Build parameters
    pub parameters: BTreeMap<String, String>,
    /// Keep the ledger record once the build is terminal
    pub preserve_status: bool,
}

impl JobRequest {
    /// A request without parameters whose record is pruned once terminal
    pub fn new(job_name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            hash: hash.into(),
            parameters: BTreeMap::new(),
            preserve_status: false,
        }
    }

    /// Set the build parameters
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Keep the record in the ledger after the build is terminal
    pub fn preserved(mut self) -> Self {
        self.preserve_status = true;
        self
    }
}

/// Drives jobs through submit, poll, retry and expiry
pub struct JobExecutor<'a> {
    api: &'a dyn JenkinsApi,
    store: &'a dyn StatusStore,
    max_retries: u32,
    max_run_age: Option<Duration>,
}

impl<'a> JobExecutor<'a> {
    /// Executor with the default retry budget and no run-age limit
    pub fn new(api: &'a dyn JenkinsApi, store: &'a dyn StatusStore) -> Self {
        Self {
            api,
            store,
            max_retries: DEFAULT_MAX_RETRIES,
            max_run_age: None,
        }
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Expire running builds whose record is older than `max_run_age`.
    ///
    /// An expired build is stopped and then reported done, like any other
    /// expired record. Callers that need the build's effect must check for
    /// an `expired` record themselves.
    pub fn with_max_run_age(mut self, max_run_age: Option<Duration>) -> Self {
        self.max_run_age = max_run_age;
        self
    }

    /// The Jenkins client builds are submitted through
    pub fn api(&self) -> &'a dyn JenkinsApi {
        self.api
    }

    /// The store every ledger transition is written through
    pub fn store(&self) -> &'a dyn StatusStore {
        self.store
    }

    /// Ensure the job in `request` runs to completion for its fingerprint.
    ///
    /// Returns `Ok(true)` once the build succeeded (or an expired build was
    /// aborted), `Ok(false)` while work is in progress, including right
    /// after a failed build was resubmitted. Errors are returned when the
    /// retry budget is exhausted ([`Error::Unrecoverable`]), when Jenkins
    /// or the ledger reports a status the executor cannot handle
    /// ([`Error::UnexpectedStatus`]), when an expired build cannot be
    /// aborted ([`Error::AbortFailed`]), or when a call to Jenkins or the
    /// status write fails.
    pub async fn ensure_job(&self, jenkins: &mut Jenkins, request: &JobRequest) -> Result<bool> {
        let existing = jenkins
            .status
            .as_ref()
            .and_then(|s| s.builds.find(&request.job_name, &request.hash))
            .cloned();

        let Some(mut build) = existing else {
            self.submit(jenkins, request).await?;
            return Ok(false);
        };

        if build.status == BuildStatus::Running && self.is_too_old(&build, Utc::now()) {
            info!(
                job = %build.job_name,
                number = build.number,
                "Build exceeded its maximum run age, expiring"
            );
            build.status = BuildStatus::Expired;
            self.save(jenkins, build.clone()).await?;
        }

        match build.status {
            BuildStatus::Running => self.poll(jenkins, request, build).await,
            BuildStatus::Success => self.succeeded(jenkins, request).await,
            BuildStatus::Expired => self.abort(jenkins, request, build).await,
            status if status.is_failure() => self.failed(jenkins, request, build).await,
            status => Err(Error::UnexpectedStatus {
                job: request.job_name.clone(),
                status: status.to_string(),
            }),
        }
    }

    fn is_too_old(&self, build: &Build, now: DateTime<Utc>) -> bool {
        let (Some(max_age), Some(created)) = (self.max_run_age, build.create_time) else {
            return false;
        };
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => now - created > max_age,
            Err(_) => false,
        }
    }

    async fn submit(&self, jenkins: &mut Jenkins, request: &JobRequest) -> Result<()> {
        let number = self
            .api
            .build_job(&request.job_name, &request.parameters)
            .await?;
        info!(job = %request.job_name, hash = %request.hash, number, "Submitted build");
        self.save(
            jenkins,
            Build::running(&request.job_name, &request.hash, number),
        )
        .await
    }

    async fn poll(&self, jenkins: &mut Jenkins, request: &JobRequest, mut build: Build) -> Result<bool> {
        let result = match self.api.build_result(&build.job_name, build.number).await {
            Ok(result) => result,
            Err(e) if e.is_not_found() => {
                debug!(job = %build.job_name, number = build.number, "Build not registered yet");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let Some(result) = result else {
            debug!(job = %build.job_name, number = build.number, "Build still running");
            return Ok(false);
        };

        match BuildStatus::from_result(&result) {
            Some(BuildStatus::Running) => Ok(false),
            Some(BuildStatus::Success) => {
                info!(job = %build.job_name, number = build.number, "Build succeeded");
                build.status = BuildStatus::Success;
                self.save(jenkins, build).await?;
                self.succeeded(jenkins, request).await
            }
            Some(status) if status.is_failure() => {
                warn!(job = %build.job_name, number = build.number, %status, "Build failed");
                build.status = status;
                self.save(jenkins, build.clone()).await?;
                self.failed(jenkins, request, build).await
            }
            _ => {
                warn!(job = %build.job_name, number = build.number, %result, "Unexpected build result");
                Err(Error::UnexpectedStatus {
                    job: build.job_name,
                    status: result,
                })
            }
        }
    }

    async fn succeeded(&self, jenkins: &mut Jenkins, request: &JobRequest) -> Result<bool> {
        if !request.preserve_status {
            self.forget(jenkins, request).await?;
        }
        Ok(true)
    }

    async fn failed(&self, jenkins: &mut Jenkins, request: &JobRequest, mut build: Build) -> Result<bool> {
        if build.retries < self.max_retries {
            let number = self
                .api
                .build_job(&request.job_name, &request.parameters)
                .await?;
            build.retries += 1;
            build.number = number;
            build.status = BuildStatus::Running;
            info!(
                job = %build.job_name,
                number,
                retries = build.retries,
                max_retries = self.max_retries,
                "Resubmitted failed build"
            );
            self.save(jenkins, build).await?;
            return Ok(false);
        }

        warn!(
            job = %build.job_name,
            number = build.number,
            retries = build.retries,
            "Build failed and its retry budget is exhausted"
        );
        if !request.preserve_status {
            self.forget(jenkins, request).await?;
        }
        Err(Error::Unrecoverable {
            job: request.job_name.clone(),
        })
    }

    async fn abort(&self, jenkins: &mut Jenkins, request: &JobRequest, build: Build) -> Result<bool> {
        let already_aborted = match self.is_aborted(&build).await {
            Ok(aborted) => aborted,
            Err(e) => {
                debug!(
                    job = %build.job_name,
                    number = build.number,
                    error = %e,
                    "Could not poll expired build, stopping it"
                );
                false
            }
        };

        if !already_aborted {
            info!(job = %build.job_name, number = build.number, "Stopping expired build");
            self.api
                .stop_build(&build.job_name, build.number)
                .await
                .map_err(|e| abort_failed(&build, e.to_string()))?;

            match self.is_aborted(&build).await {
                Ok(true) => {}
                Ok(false) => return Err(abort_failed(&build, "build is not reported as aborted")),
                Err(e) => return Err(abort_failed(&build, e.to_string())),
            }
        }

        if request.preserve_status {
            self.save(jenkins, build).await?;
        } else {
            self.forget(jenkins, request).await?;
        }
        Ok(true)
    }

    async fn is_aborted(&self, build: &Build) -> Result<bool> {
        let result = self.api.build_result(&build.job_name, build.number).await?;
        Ok(result.as_deref().and_then(BuildStatus::from_result) == Some(BuildStatus::Aborted))
    }

    async fn save(&self, jenkins: &mut Jenkins, build: Build) -> Result<()> {
        jenkins.status_mut().builds.upsert(build, Utc::now());
        self.store.update_status(jenkins).await
    }

    async fn forget(&self, jenkins: &mut Jenkins, request: &JobRequest) -> Result<()> {
        let removed = jenkins
            .status_mut()
            .builds
            .remove(&request.job_name, &request.hash);
        if removed.is_some() {
            debug!(job = %request.job_name, hash = %request.hash, "Removed build record");
            self.store.update_status(jenkins).await?;
        }
        Ok(())
    }
}

fn abort_failed(build: &Build, reason: impl Into<String>) -> Error {
    Error::AbortFailed {
        job: build.job_name.clone(),
        number: build.number,
        reason: reason.into(),
    }
}

//! Configuration phases of a Jenkins master
//!
//! The base phase ([`base`]) provisions the master and applies the
//! operator's own configuration. The user phase ([`user`]) restores job
//! history, applies user scripts, provisions seed jobs and backs up. Both
//! phases are made of steps that report a [`Progress`]; a phase stops at the
//! first step that is not done so later steps never run ahead of earlier
//! ones.

pub mod backup;
pub mod base;
mod groovy;
pub mod seedjobs;
pub mod user;

use std::time::Duration;

use tracing::warn;

use crate::jenkins::JenkinsApi;
use crate::jobs::{JobExecutor, StatusStore, DEFAULT_MAX_RETRIES};
use crate::Result;

pub use groovy::{ScriptJob, HASH_PARAMETER};

/// Requeue delay while a configuration or build job is in progress
pub const JOB_REQUEUE: Duration = Duration::from_secs(10);
/// Requeue delay while waiting for the master pod to become ready
pub const POD_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue delay after the operator wrote the Jenkins resource itself
pub const UPDATE_REQUEUE: Duration = Duration::from_secs(1);

/// Operator-wide settings shared by both phases
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Reach Jenkins through localhost instead of the service DNS name
    pub local: bool,
    /// Expose the master through a NodePort service
    pub minikube: bool,
    /// Resubmissions allowed after the first failed build
    pub max_build_retries: u32,
    /// Expire builds running for longer than this
    pub max_build_age: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            local: false,
            minikube: false,
            max_build_retries: DEFAULT_MAX_RETRIES,
            max_build_age: None,
        }
    }
}

impl ReconcileOptions {
    /// Job executor configured with these options
    pub fn executor<'a>(
        &self,
        api: &'a dyn JenkinsApi,
        store: &'a dyn StatusStore,
    ) -> JobExecutor<'a> {
        JobExecutor::new(api, store)
            .with_max_retries(self.max_build_retries)
            .with_max_run_age(self.max_build_age)
    }
}

/// Outcome of one configuration step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The step is complete, the next one may run
    Done,
    /// Work is in flight, reconcile again after the delay
    Requeue(Duration),
    /// A job failed for good; the phase stops until the resource changes
    Halted(String),
}

impl Progress {
    /// True when the step is complete
    pub fn is_done(&self) -> bool {
        matches!(self, Progress::Done)
    }

    /// Map the outcome of [`crate::jobs::JobExecutor::ensure_job`] to a step
    /// outcome.
    ///
    /// Terminal job errors halt the phase, `hint` is appended to the reason
    /// shown to the user. Any other error is returned to the caller.
    pub fn from_job(job: &str, result: Result<bool>, hint: Option<&str>) -> Result<Self> {
        match result {
            Ok(true) => Ok(Progress::Done),
            Ok(false) => Ok(Progress::Requeue(JOB_REQUEUE)),
            Err(e) if e.is_job_terminal() => {
                let reason = match hint {
                    Some(hint) => format!("{e}, {hint}"),
                    None => e.to_string(),
                };
                warn!(job, %reason, "Configuration job halted");
                Ok(Progress::Halted(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Combine two independent steps: done only when both are, halted when
    /// either is, otherwise the shorter requeue.
    pub fn and(self, other: Progress) -> Progress {
        match (self, other) {
            (Progress::Halted(reason), _) | (_, Progress::Halted(reason)) => {
                Progress::Halted(reason)
            }
            (Progress::Done, other) | (other, Progress::Done) => other,
            (Progress::Requeue(a), Progress::Requeue(b)) => Progress::Requeue(a.min(b)),
        }
    }
}

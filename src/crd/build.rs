//! Build records and the ledger persisted in the Jenkins status

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a tracked Jenkins build
///
/// Serialized as the lower-case strings Jenkins results map to. `Expired` is
/// never reported by Jenkins: it is set on the ledger to force-stop a stale
/// build.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Submitted and not finished
    #[default]
    Running,
    /// Finished successfully
    Success,
    /// Finished with test failures
    Unstable,
    /// Never executed
    NotBuild,
    /// Finished with an error
    Failure,
    /// Stopped before finishing
    Aborted,
    /// Marked for cancellation
    Expired,
    /// A persisted value this version does not recognise
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    /// Parse a build result reported by Jenkins (`SUCCESS`, `FAILURE`, ...).
    ///
    /// Returns None for results the executor does not know how to handle.
    pub fn from_result(result: &str) -> Option<Self> {
        match result.to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "unstable" => Some(Self::Unstable),
            "not_build" | "not_built" => Some(Self::NotBuild),
            "failure" => Some(Self::Failure),
            "aborted" => Some(Self::Aborted),
            "running" => Some(Self::Running),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Finished without success; eligible for retry
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failure | Self::Unstable | Self::NotBuild | Self::Aborted
        )
    }

    /// The serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Unstable => "unstable",
            Self::NotBuild => "not_build",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt (or series of retried attempts) to run a job for a fingerprint
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// Jenkins job name
    pub job_name: String,

    /// Fingerprint of the desired content this build applies
    pub hash: String,

    /// Jenkins build number, 0 until a submission succeeds
    #[serde(default)]
    pub number: i64,

    /// Last observed status
    #[serde(default)]
    pub status: BuildStatus,

    /// Resubmissions after a failure
    #[serde(default)]
    pub retries: u32,

    /// When the record was first written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,

    /// When the record was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl Build {
    /// A freshly submitted build
    pub fn running(job_name: impl Into<String>, hash: impl Into<String>, number: i64) -> Self {
        Self {
            job_name: job_name.into(),
            hash: hash.into(),
            number,
            status: BuildStatus::Running,
            retries: 0,
            create_time: None,
            last_update_time: None,
        }
    }

    /// True if this record tracks `(job_name, hash)`
    pub fn matches(&self, job_name: &str, hash: &str) -> bool {
        self.job_name == job_name && self.hash == hash
    }
}

/// Builds tracked for one Jenkins resource, at most one per `(job, hash)`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct BuildLedger(Vec<Build>);

impl BuildLedger {
    /// Find the record for `(job_name, hash)`
    pub fn find(&self, job_name: &str, hash: &str) -> Option<&Build> {
        self.0.iter().find(|b| b.matches(job_name, hash))
    }

    /// Insert or replace the record with the same `(job, hash)`.
    ///
    /// Stamps `last_update_time`, and `create_time` when inserting.
    pub fn upsert(&mut self, mut build: Build, now: DateTime<Utc>) {
        build.last_update_time = Some(now);
        match self
            .0
            .iter_mut()
            .find(|b| b.matches(&build.job_name, &build.hash))
        {
            Some(existing) => {
                build.create_time = existing.create_time.or(build.create_time).or(Some(now));
                *existing = build;
            }
            None => {
                build.create_time = Some(now);
                self.0.push(build);
            }
        }
    }

    /// Remove the record for `(job_name, hash)`, returning it
    pub fn remove(&mut self, job_name: &str, hash: &str) -> Option<Build> {
        let index = self.0.iter().position(|b| b.matches(job_name, hash))?;
        Some(self.0.remove(index))
    }

    /// Drop every record of `job_name` whose hash is not `keep_hash`,
    /// whatever its status. Returns how many were removed.
    pub fn prune_superseded(&mut self, job_name: &str, keep_hash: &str) -> usize {
        self.retain_hashes(job_name, &[keep_hash])
    }

    /// Drop records of `job_name` whose hash is not in `keep_hashes`.
    /// Returns how many were removed.
    pub fn retain_hashes<S: AsRef<str>>(&mut self, job_name: &str, keep_hashes: &[S]) -> usize {
        let before = self.0.len();
        self.0.retain(|b| {
            b.job_name != job_name || keep_hashes.iter().any(|h| h.as_ref() == b.hash)
        });
        before - self.0.len()
    }

    /// Iterate over all records
    pub fn iter(&self) -> impl Iterator<Item = &Build> {
        self.0.iter()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Build> for BuildLedger {
    fn from_iter<T: IntoIterator<Item = Build>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

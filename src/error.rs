//! Error types for the Jenkins operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for the Jenkins custom resource
    #[error("validation error: {0}")]
    Validation(String),

    /// Error reported by the Jenkins HTTP API
    #[error("jenkins API error{}: {message}", status_suffix(.status))]
    Jenkins {
        /// HTTP status code returned by Jenkins, if a response was received
        status: Option<u16>,
        /// Description of the failed call
        message: String,
    },

    /// Transport-level HTTP failure talking to Jenkins
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A plugin identifier that is not of the form `name:version`
    #[error("invalid plugin identifier '{0}', expected 'name:version'")]
    InvalidPlugin(String),

    /// A job failed and its retry budget is exhausted
    #[error("job '{job}' failed and cannot be recovered")]
    Unrecoverable {
        /// Name of the Jenkins job
        job: String,
    },

    /// The ledger or Jenkins reported a build status the executor doesn't know
    #[error("job '{job}' has unexpected build status '{status}'")]
    UnexpectedStatus {
        /// Name of the Jenkins job
        job: String,
        /// The offending status string
        status: String,
    },

    /// Stopping an expired build failed or could not be confirmed
    #[error("couldn't abort build #{number} of job '{job}': {reason}")]
    AbortFailed {
        /// Name of the Jenkins job
        job: String,
        /// Build number that should have been aborted
        number: i64,
        /// Why the abort could not be confirmed
        reason: String,
    },

    /// A Kubernetes object the operator depends on does not exist
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// A script or job definition template failed to render
    #[error("template error: {0}")]
    Template(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a Jenkins API error without an HTTP status
    pub fn jenkins(msg: impl Into<String>) -> Self {
        Self::Jenkins {
            status: None,
            message: msg.into(),
        }
    }

    /// Create a Jenkins API error for a non-success HTTP response
    pub fn jenkins_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Jenkins {
            status: Some(status),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a missing resource error with the given message
    pub fn missing_resource(msg: impl Into<String>) -> Self {
        Self::MissingResource(msg.into())
    }

    /// Returns true when the error is an optimistic-concurrency conflict (HTTP 409)
    /// from the Kubernetes API
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// Returns true when the error means "not found" (HTTP 404), either from
    /// Jenkins or from the Kubernetes API
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Jenkins {
                status: Some(404), ..
            } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Returns true for errors that stop a job permanently until an operator
    /// intervenes (budget exhausted, unknown status, failed abort)
    pub fn is_job_terminal(&self) -> bool {
        matches!(
            self,
            Error::Unrecoverable { .. } | Error::UnexpectedStatus { .. } | Error::AbortFailed { .. }
        )
    }
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

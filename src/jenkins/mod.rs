//! Jenkins API seam
//!
//! [`JenkinsApi`] is everything the job engine and the configuration phases
//! need from a running master. [`JenkinsConnector`] builds authenticated
//! clients so the controller can be tested without a master.

mod client;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::plugins::InstalledPlugin;
use crate::Error;

pub use client::{api_url, HttpConnector, JenkinsClient};

/// Operations on a running Jenkins master
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JenkinsApi: Send + Sync {
    /// Queue a build of `job_name` and return the build number it will get
    async fn build_job(
        &self,
        job_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<i64, Error>;

    /// Result string of a build (`SUCCESS`, `FAILURE`, ...), or None while it
    /// is still building.
    ///
    /// A build Jenkins has not registered yet yields an error for which
    /// [`Error::is_not_found`] is true.
    async fn build_result(&self, job_name: &str, number: i64) -> Result<Option<String>, Error>;

    /// Ask Jenkins to abort a build
    async fn stop_build(&self, job_name: &str, number: i64) -> Result<bool, Error>;

    /// Create the job if absent, else overwrite its definition. Returns true
    /// when the job was created.
    async fn create_or_update_job(&self, config_xml: &str, job_name: &str) -> Result<bool, Error>;

    /// Every plugin the master knows about
    async fn installed_plugins(&self) -> Result<Vec<InstalledPlugin>, Error>;

    /// Generate an API token for `user`
    async fn generate_token(&self, user: &str, token_name: &str) -> Result<String, Error>;
}

/// Builds authenticated [`JenkinsApi`] clients
#[cfg_attr(test, automock)]
pub trait JenkinsConnector: Send + Sync {
    /// Connect to the master at `url` with a password or API token
    fn connect(&self, url: &str, user: &str, secret: &str) -> Result<Arc<dyn JenkinsApi>, Error>;
}

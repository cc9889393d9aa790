//! HTTP implementation of [`JenkinsApi`] over the Jenkins REST API

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use super::{JenkinsApi, JenkinsConnector};
use crate::plugins::InstalledPlugin;
use crate::Error;

/// Timeout applied to every call made to Jenkins
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URL of a master's HTTP API.
///
/// In cluster the service DNS name is used; `local` is for an operator
/// running outside the cluster with the service port-forwarded.
pub fn api_url(namespace: &str, service: &str, port: u16, local: bool) -> String {
    if local {
        format!("http://localhost:{port}")
    } else {
        format!("http://{service}.{namespace}.svc.cluster.local:{port}")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInfo {
    next_build_number: i64,
}

#[derive(Deserialize)]
struct BuildInfo {
    result: Option<String>,
}

#[derive(Deserialize)]
struct PluginList {
    #[serde(default)]
    plugins: Vec<InstalledPlugin>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crumb {
    crumb_request_field: String,
    crumb: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    token_value: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    data: TokenData,
}

/// Jenkins REST client authenticated with basic auth (password or API token)
pub struct JenkinsClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    secret: String,
}

impl JenkinsClient {
    /// Create a client for the master at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            secret: secret.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.url(path))
            .basic_auth(&self.user, Some(&self.secret))
    }

    /// POST with a CSRF crumb attached when the master issues them
    async fn post(&self, path: &str) -> Result<RequestBuilder, Error> {
        let mut request = self
            .http
            .post(self.url(path))
            .basic_auth(&self.user, Some(&self.secret));
        if let Some(crumb) = self.crumb().await? {
            request = request.header(crumb.crumb_request_field, crumb.crumb);
        }
        Ok(request)
    }

    async fn crumb(&self) -> Result<Option<Crumb>, Error> {
        let response = self.get("/crumbIssuer/api/json").send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, "GET /crumbIssuer/api/json").await?;
        Ok(Some(response.json().await?))
    }
}

/// Turn a non-success response into [`Error::Jenkins`] carrying its status
async fn check(response: Response, call: &str) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let mut message = call.to_string();
    if !body.is_empty() {
        message.push_str(": ");
        message.push_str(body.lines().next().unwrap_or_default());
    }
    Err(Error::jenkins_status(status.as_u16(), message))
}

#[async_trait]
impl JenkinsApi for JenkinsClient {
    async fn build_job(
        &self,
        job_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<i64, Error> {
        let info_path = format!("/job/{job_name}/api/json");
        let response = check(self.get(&info_path).send().await?, &info_path).await?;
        let info: JobInfo = response.json().await?;

        let (path, request) = if parameters.is_empty() {
            let path = format!("/job/{job_name}/build");
            let request = self.post(&path).await?;
            (path, request)
        } else {
            let path = format!("/job/{job_name}/buildWithParameters");
            let request = self.post(&path).await?.form(parameters);
            (path, request)
        };
        check(request.send().await?, &format!("POST {path}")).await?;

        debug!(job = %job_name, number = info.next_build_number, "Build queued");
        Ok(info.next_build_number)
    }

    async fn build_result(&self, job_name: &str, number: i64) -> Result<Option<String>, Error> {
        let path = format!("/job/{job_name}/{number}/api/json");
        let response = check(self.get(&path).send().await?, &format!("GET {path}")).await?;
        let build: BuildInfo = response.json().await?;
        Ok(build.result.filter(|r| !r.is_empty()))
    }

    async fn stop_build(&self, job_name: &str, number: i64) -> Result<bool, Error> {
        let path = format!("/job/{job_name}/{number}/stop");
        let response = self.post(&path).await?.send().await?;
        check(response, &format!("POST {path}")).await?;
        Ok(true)
    }

    async fn create_or_update_job(&self, config_xml: &str, job_name: &str) -> Result<bool, Error> {
        let config_path = format!("/job/{job_name}/config.xml");
        let existing = self.get(&config_path).send().await?;

        if existing.status() == reqwest::StatusCode::NOT_FOUND {
            let request = self
                .post("/createItem")
                .await?
                .query(&[("name", job_name)])
                .header(reqwest::header::CONTENT_TYPE, "application/xml")
                .body(config_xml.to_string());
            check(request.send().await?, "POST /createItem").await?;
            return Ok(true);
        }
        check(existing, &format!("GET {config_path}")).await?;

        let request = self
            .post(&config_path)
            .await?
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(config_xml.to_string());
        check(request.send().await?, &format!("POST {config_path}")).await?;
        Ok(false)
    }

    async fn installed_plugins(&self) -> Result<Vec<InstalledPlugin>, Error> {
        let path = "/pluginManager/api/json?depth=1";
        let response = check(self.get(path).send().await?, path).await?;
        let list: PluginList = response.json().await?;
        Ok(list.plugins)
    }

    async fn generate_token(&self, user: &str, token_name: &str) -> Result<String, Error> {
        let path =
            format!("/user/{user}/descriptorByName/jenkins.security.ApiTokenProperty/generateNewToken");
        let request = self.post(&path).await?.form(&[("newTokenName", token_name)]);
        let response = check(request.send().await?, &format!("POST {path}")).await?;
        let token: TokenResponse = response.json().await?;
        Ok(token.data.token_value)
    }
}

/// Production [`JenkinsConnector`] creating [`JenkinsClient`]s
#[derive(Clone, Debug, Default)]
pub struct HttpConnector;

impl JenkinsConnector for HttpConnector {
    fn connect(&self, url: &str, user: &str, secret: &str) -> Result<Arc<dyn JenkinsApi>, Error> {
        Ok(Arc::new(JenkinsClient::new(url, user, secret)?))
    }
}

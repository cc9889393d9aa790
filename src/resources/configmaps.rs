//! Config maps holding scripts mounted into the master pod

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use minijinja::context;

use super::{
    base_configuration_config_map_name, init_configuration_config_map_name, labels, object_meta,
    resource_name, scripts_config_map_name, user_configuration_config_map_name, watched_labels,
    BACKUP_SCRIPT_NAME, HTTP_PORT, INIT_CONFIGURATION_PATH, INIT_SCRIPT_NAME, JENKINS_HOME_PATH,
    OPERATOR_CREDENTIALS_PATH, OPERATOR_NAME, OPERATOR_USER_NAME, PASSWORD_KEY, SCRIPTS_PATH,
    SEED_JOB_SUFFIX, TOKEN_KEY, USER_NAME_KEY,
};
use crate::backup::BACKUP_JOB_NAME;
use crate::crd::Jenkins;
use crate::templates;
use crate::Result;

/// Executors on the master, enough for the operator's own jobs
const MASTER_EXECUTORS: u32 = 3;

const INSTALL_PLUGINS_SCRIPT_NAME: &str = "install-plugins.sh";
const CREATE_OPERATOR_USER_NAME: &str = "createOperatorUser.groovy";

fn config_map(
    jenkins: &Jenkins,
    name: String,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(jenkins, name, labels),
        data: Some(data),
        ..Default::default()
    }
}

/// Entrypoint, plugin installer and backup scripts.
///
/// The entrypoint installs every plugin declared in `spec.master.plugins`.
pub fn scripts_config_map(jenkins: &Jenkins) -> Result<ConfigMap> {
    let init = templates::render(
        INIT_SCRIPT_NAME,
        templates::INIT_SCRIPT,
        context! {
            home_path => JENKINS_HOME_PATH,
            init_configuration_path => INIT_CONFIGURATION_PATH,
            scripts_path => SCRIPTS_PATH,
            plugins => &jenkins.spec.master.plugins,
        },
    )?;
    let install_plugins = templates::render(
        INSTALL_PLUGINS_SCRIPT_NAME,
        templates::INSTALL_PLUGINS_SCRIPT,
        context! { home_path => JENKINS_HOME_PATH },
    )?;
    let backup = templates::render(
        BACKUP_SCRIPT_NAME,
        templates::BACKUP_SCRIPT,
        context! {
            user => OPERATOR_USER_NAME,
            credentials_path => OPERATOR_CREDENTIALS_PATH,
            token_key => TOKEN_KEY,
            http_port => HTTP_PORT,
            job => BACKUP_JOB_NAME,
        },
    )?;

    Ok(config_map(
        jenkins,
        scripts_config_map_name(jenkins),
        labels(jenkins),
        BTreeMap::from([
            (INIT_SCRIPT_NAME.to_string(), init),
            (INSTALL_PLUGINS_SCRIPT_NAME.to_string(), install_plugins),
            (BACKUP_SCRIPT_NAME.to_string(), backup),
        ]),
    ))
}

/// Groovy run once at startup to create the operator user
pub fn init_configuration_config_map(jenkins: &Jenkins) -> Result<ConfigMap> {
    let create_user = templates::render(
        CREATE_OPERATOR_USER_NAME,
        templates::CREATE_OPERATOR_USER,
        context! {
            credentials_path => OPERATOR_CREDENTIALS_PATH,
            user_key => USER_NAME_KEY,
            password_key => PASSWORD_KEY,
        },
    )?;

    Ok(config_map(
        jenkins,
        init_configuration_config_map_name(jenkins),
        labels(jenkins),
        BTreeMap::from([(CREATE_OPERATOR_USER_NAME.to_string(), create_user)]),
    ))
}

/// Operator-owned configuration scripts run by the base configuration job
pub fn base_configuration_config_map(jenkins: &Jenkins) -> Result<ConfigMap> {
    let ctx = context! {
        executors => MASTER_EXECUTORS,
        namespace => jenkins.namespace().unwrap_or_default(),
        service => resource_name(jenkins),
        http_port => HTTP_PORT,
        seed_job_suffix => SEED_JOB_SUFFIX,
        operator => OPERATOR_NAME,
    };

    let data = templates::BASE_CONFIGURATION
        .iter()
        .map(|(name, source)| Ok((name.to_string(), templates::render(name, source, ctx.clone())?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(config_map(
        jenkins,
        base_configuration_config_map_name(jenkins),
        labels(jenkins),
        data,
    ))
}

/// Initial, user-editable configuration scripts.
///
/// Created once and never overwritten; edits trigger a reconcile through
/// the watch label.
pub fn user_configuration_config_map(jenkins: &Jenkins) -> ConfigMap {
    let data = templates::USER_CONFIGURATION
        .iter()
        .map(|(name, source)| (name.to_string(), source.to_string()))
        .collect();

    config_map(
        jenkins,
        user_configuration_config_map_name(jenkins),
        watched_labels(jenkins),
        data,
    )
}

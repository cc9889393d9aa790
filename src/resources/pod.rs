//! Jenkins master pod

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, ExecAction,
    HTTPGetAction, Lifecycle, LifecycleHandler, Pod, PodSecurityContext, PodSpec, Probe,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    backup_credentials_secret_name, base_configuration_config_map_name,
    init_configuration_config_map_name, labels, object_meta, operator_credentials_secret_name,
    resource_name, scripts_config_map_name, user_configuration_config_map_name,
    BACKUP_CREDENTIALS_PATH, BASE_CONFIGURATION_PATH, HTTP_PORT, INIT_CONFIGURATION_PATH,
    JENKINS_HOME_PATH, OPERATOR_CREDENTIALS_PATH, SCRIPTS_PATH, SLAVE_PORT,
    USER_CONFIGURATION_PATH,
};
use crate::crd::Jenkins;

/// Name of the Jenkins container in the master pod
pub const MASTER_CONTAINER_NAME: &str = "jenkins-master";
/// Entrypoint script in the scripts config map
pub const INIT_SCRIPT_NAME: &str = "init.sh";
/// preStop script in the scripts config map
pub const BACKUP_SCRIPT_NAME: &str = "backup.sh";

const HTTP_PORT_NAME: &str = "http";
const SLAVE_PORT_NAME: &str = "slavelistener";

/// UID of the `jenkins` user in the official image
const JENKINS_UID: i64 = 1000;

const JAVA_OPTS: &str = "-XX:+UnlockExperimentalVMOptions -XX:MaxRAMPercentage=75 \
-Djenkins.install.runSetupWizard=false -Djava.awt.headless=true";

fn login_probe() -> HTTPGetAction {
    HTTPGetAction {
        path: Some("/login".to_string()),
        port: IntOrString::String(HTTP_PORT_NAME.to_string()),
        scheme: Some("HTTP".to_string()),
        ..Default::default()
    }
}

fn config_map_volume(name: &str, config_map: String) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: String) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

fn bash(script: &str) -> Vec<String> {
    vec!["bash".to_string(), format!("{SCRIPTS_PATH}/{script}")]
}

/// The Jenkins master pod.
///
/// Jenkins home is an emptyDir: a new pod starts from scratch and relies on
/// the restore job for history. The pod never restarts in place so a
/// crashed master is observed and recreated by the operator.
pub fn master_pod(jenkins: &Jenkins) -> Pod {
    let name = resource_name(jenkins);
    let master = &jenkins.spec.master;

    let mut metadata = object_meta(jenkins, name.clone(), labels(jenkins));
    if !master.master_annotations.is_empty() {
        metadata.annotations = Some(master.master_annotations.clone());
    }

    let container = Container {
        name: MASTER_CONTAINER_NAME.to_string(),
        image: Some(master.image.clone()),
        command: Some(bash(INIT_SCRIPT_NAME)),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(bash(BACKUP_SCRIPT_NAME)),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            http_get: Some(login_probe()),
            initial_delay_seconds: Some(30),
            timeout_seconds: Some(5),
            failure_threshold: Some(12),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(login_probe()),
            initial_delay_seconds: Some(30),
            ..Default::default()
        }),
        ports: Some(vec![
            ContainerPort {
                name: Some(SLAVE_PORT_NAME.to_string()),
                container_port: i32::from(SLAVE_PORT),
                ..Default::default()
            },
            ContainerPort {
                name: Some(HTTP_PORT_NAME.to_string()),
                container_port: i32::from(HTTP_PORT),
                ..Default::default()
            },
        ]),
        env: Some(vec![
            EnvVar {
                name: "JENKINS_HOME".to_string(),
                value: Some(JENKINS_HOME_PATH.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "JAVA_OPTS".to_string(),
                value: Some(JAVA_OPTS.to_string()),
                ..Default::default()
            },
        ]),
        resources: master.resources.clone(),
        volume_mounts: Some(vec![
            mount("home", JENKINS_HOME_PATH, false),
            mount("scripts", SCRIPTS_PATH, true),
            mount("init-configuration", INIT_CONFIGURATION_PATH, true),
            mount("base-configuration", BASE_CONFIGURATION_PATH, true),
            mount("user-configuration", USER_CONFIGURATION_PATH, true),
            mount("operator-credentials", OPERATOR_CREDENTIALS_PATH, true),
            mount("backup-credentials", BACKUP_CREDENTIALS_PATH, true),
        ]),
        ..Default::default()
    };

    Pod {
        metadata,
        spec: Some(PodSpec {
            service_account_name: Some(name),
            restart_policy: Some("Never".to_string()),
            security_context: Some(PodSecurityContext {
                run_as_user: Some(JENKINS_UID),
                run_as_group: Some(JENKINS_UID),
                ..Default::default()
            }),
            containers: vec![container],
            volumes: Some(vec![
                Volume {
                    name: "home".to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
                config_map_volume("scripts", scripts_config_map_name(jenkins)),
                config_map_volume(
                    "init-configuration",
                    init_configuration_config_map_name(jenkins),
                ),
                config_map_volume(
                    "base-configuration",
                    base_configuration_config_map_name(jenkins),
                ),
                config_map_volume(
                    "user-configuration",
                    user_configuration_config_map_name(jenkins),
                ),
                secret_volume(
                    "operator-credentials",
                    operator_credentials_secret_name(jenkins),
                ),
                secret_volume("backup-credentials", backup_credentials_secret_name(jenkins)),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

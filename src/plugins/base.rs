//! Plugins every Jenkins master managed by the operator must have

use super::PluginRequirementSet;

/// Shared HTTP client dependency, also required by the S3 backup strategy
pub const APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN: &str = "apache-httpcomponents-client-4-api:4.5.5-3.0";

/// Shared Jackson dependency, also required by the S3 backup strategy
pub const JACKSON2_API_PLUGIN: &str = "jackson2-api:2.9.8";

const BASE_PLUGINS: &[(&str, &[&str])] = &[
    (
        "kubernetes:1.13.8",
        &[
            APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN,
            "cloudbees-folder:6.7",
            "credentials:2.1.18",
            "durable-task:1.28",
            JACKSON2_API_PLUGIN,
            "kubernetes-credentials:0.4.0",
            "plain-credentials:1.5",
            "structs:1.17",
            "variant:1.1",
            "workflow-step-api:2.17",
        ],
    ),
    (
        "workflow-job:2.31",
        &[
            "scm-api:2.3.0",
            "script-security:1.50",
            "structs:1.17",
            "workflow-api:2.33",
            "workflow-step-api:2.17",
            "workflow-support:3.0",
        ],
    ),
    (
        "workflow-aggregator:2.6",
        &[
            "ace-editor:1.1",
            APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN,
            "authentication-tokens:1.3",
            "branch-api:2.1.2",
            "cloudbees-folder:6.7",
            "credentials-binding:1.17",
            "credentials:2.1.18",
            "display-url-api:2.3.0",
            "docker-commons:1.13",
            "docker-workflow:1.17",
            "durable-task:1.28",
            "git-client:2.7.6",
            "git-server:1.7",
            "handlebars:1.1.1",
            JACKSON2_API_PLUGIN,
            "jquery-detached:1.2.1",
            "jsch:0.1.55",
            "junit:1.26.1",
            "lockable-resources:2.3",
            "mailer:1.23",
            "matrix-project:1.13",
            "momentjs:1.1.1",
            "pipeline-build-step:2.7",
            "pipeline-graph-analysis:1.9",
            "pipeline-input-step:2.9",
            "pipeline-milestone-step:1.3.1",
            "pipeline-model-api:1.3.4.1",
            "pipeline-model-declarative-agent:1.1.1",
            "pipeline-model-definition:1.3.4.1",
            "pipeline-model-extensions:1.3.4.1",
            "pipeline-rest-api:2.10",
            "pipeline-stage-step:2.3",
            "pipeline-stage-tags-metadata:1.3.4.1",
            "pipeline-stage-view:2.10",
            "plain-credentials:1.5",
            "scm-api:2.3.0",
            "script-security:1.50",
            "ssh-credentials:1.14",
            "structs:1.17",
            "workflow-api:2.33",
            "workflow-basic-steps:2.13",
            "workflow-cps-global-lib:2.12",
            "workflow-cps:2.61.1",
            "workflow-durable-task-step:2.27",
            "workflow-job:2.31",
            "workflow-multibranch:2.20",
            "workflow-scm-step:2.7",
            "workflow-step-api:2.17",
            "workflow-support:3.0",
        ],
    ),
    (
        "git:3.9.1",
        &[
            APACHE_HTTPCOMPONENTS_CLIENT_PLUGIN,
            "credentials:2.1.18",
            "display-url-api:2.3.0",
            "git-client:2.7.6",
            "jsch:0.1.55",
            "junit:1.26.1",
            "mailer:1.23",
            "matrix-project:1.13",
            "scm-api:2.3.0",
            "script-security:1.50",
            "ssh-credentials:1.14",
            "structs:1.17",
            "workflow-api:2.33",
            "workflow-scm-step:2.7",
            "workflow-step-api:2.17",
        ],
    ),
    ("job-dsl:1.71", &["script-security:1.50", "structs:1.17"]),
    ("jobConfigHistory:2.19", &[]),
    (
        "configuration-as-code:1.4",
        &["configuration-as-code-support:1.4"],
    ),
    ("simple-theme-plugin:0.5.1", &[]),
];

/// The plugins installed on every master, used as the default for
/// `spec.master.plugins`
pub fn base_plugins() -> PluginRequirementSet {
    BASE_PLUGINS
        .iter()
        .fold(PluginRequirementSet::new(), |set, (root, deps)| {
            set.with(*root, deps)
        })
}

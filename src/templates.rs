//! Script, groovy and job definition templates
//!
//! Templates are loaded at compile time from `templates/` and rendered with
//! minijinja. Templates named `*.xml` are auto-escaped, so values interpolated
//! into job definitions are always well-formed XML.

use minijinja::{Environment, Value};

use crate::Result;

/// Master entrypoint: installs plugins, seeds init.groovy.d, starts Jenkins
pub const INIT_SCRIPT: &str = include_str!("../templates/scripts/init.sh");
/// Downloads `name:version` plugins into the reference directory
pub const INSTALL_PLUGINS_SCRIPT: &str = include_str!("../templates/scripts/install-plugins.sh");
/// preStop hook running the backup job
pub const BACKUP_SCRIPT: &str = include_str!("../templates/scripts/backup.sh");

/// Init script creating the operator user
pub const CREATE_OPERATOR_USER: &str = include_str!("../templates/groovy/create-operator-user.groovy");

/// Base configuration scripts, in execution order
pub const BASE_CONFIGURATION: &[(&str, &str)] = &[
    (
        "1-basic-settings.groovy",
        include_str!("../templates/groovy/base/1-basic-settings.groovy"),
    ),
    (
        "2-enable-csrf.groovy",
        include_str!("../templates/groovy/base/2-enable-csrf.groovy"),
    ),
    (
        "3-disable-usage-stats.groovy",
        include_str!("../templates/groovy/base/3-disable-usage-stats.groovy"),
    ),
    (
        "4-enable-master-access-control.groovy",
        include_str!("../templates/groovy/base/4-enable-master-access-control.groovy"),
    ),
    (
        "5-disable-insecure-features.groovy",
        include_str!("../templates/groovy/base/5-disable-insecure-features.groovy"),
    ),
    (
        "6-configure-kubernetes-plugin.groovy",
        include_str!("../templates/groovy/base/6-configure-kubernetes-plugin.groovy"),
    ),
    (
        "7-configure-views.groovy",
        include_str!("../templates/groovy/base/7-configure-views.groovy"),
    ),
];

/// Default content of the user configuration config map
pub const USER_CONFIGURATION: &[(&str, &str)] = &[(
    "1-configure-theme.groovy",
    include_str!("../templates/groovy/user/1-configure-theme.groovy"),
)];

/// Pipeline loading every groovy script of a directory
pub const SCRIPT_SYNC_JOB: &str = include_str!("../templates/jobs/script-sync.xml");
/// Parameterized pipeline creating a job DSL seed job
pub const SEED_JOB: &str = include_str!("../templates/jobs/seed-job.xml");
/// Empty pipeline used by the `NoBackup` strategy
pub const NO_BACKUP_JOB: &str = include_str!("../templates/jobs/no-backup.xml");
/// Pipeline uploading job history to S3
pub const S3_BACKUP_JOB: &str = include_str!("../templates/jobs/s3-backup.xml");
/// Pipeline restoring job history from S3
pub const S3_RESTORE_JOB: &str = include_str!("../templates/jobs/s3-restore.xml");

/// Render `source` under `name` with the given context.
///
/// The name selects auto-escaping, so pass the template's file name.
pub fn render(name: &str, source: &str, ctx: Value) -> Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template(name, source)?;
    Ok(env.get_template(name)?.render(ctx)?)
}

//! Jenkins operator - provisions and configures Jenkins masters on Kubernetes

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use jenkins_operator::configuration::ReconcileOptions;
use jenkins_operator::controller::{self, Context};
use jenkins_operator::crd::Jenkins;
use jenkins_operator::jobs::DEFAULT_MAX_RETRIES;
use jenkins_operator::resources::OPERATOR_NAME;
use jenkins_operator::retry::{retry_transient, RetryConfig};
use jenkins_operator::telemetry::{init_telemetry, TelemetryConfig};

/// Jenkins operator - CRD-driven Kubernetes operator for Jenkins masters
#[derive(Parser, Debug)]
#[command(name = "jenkins-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Jenkins CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

/// Controller mode arguments, accepted before or after the subcommand
#[derive(clap::Args, Debug)]
struct ControllerArgs {
    /// Reach Jenkins masters through localhost, for running outside the cluster
    #[arg(long, global = true)]
    local: bool,

    /// Expose masters through NodePort services
    #[arg(long, global = true)]
    minikube: bool,

    /// Log the operator's debug events
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Namespace to watch, all namespaces when empty
    #[arg(long, global = true, env = "WATCH_NAMESPACE", default_value = "")]
    watch_namespace: String,

    /// Resubmissions of a failed build before its job is unrecoverable
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_RETRIES)]
    max_build_retries: u32,

    /// Abort builds running longer than this many seconds
    #[arg(long, global = true)]
    max_build_age_secs: Option<u64>,
}

impl ControllerArgs {
    fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            local: self.local,
            minikube: self.minikube,
            max_build_retries: self.max_build_retries,
            max_build_age: self.max_build_age_secs.map(Duration::from_secs),
        }
    }

    fn namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Jenkins::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: cli.controller.json_logs,
        debug: cli.controller.debug,
    });
    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

/// Install the Jenkins CRD with server-side apply so its schema always
/// matches the running operator
async fn ensure_crd_installed(client: &Client) -> jenkins_operator::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(OPERATOR_NAME).force();

    tracing::info!(crd = %Jenkins::crd_name(), "Installing Jenkins CRD...");
    crds.patch(Jenkins::crd_name(), &params, &Patch::Apply(&Jenkins::crd()))
        .await?;
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Jenkins operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    retry_transient(&RetryConfig::startup(), "install CRD", || {
        ensure_crd_installed(&client)
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Jenkins CRD: {}", e))?;

    let options = args.options();
    tracing::info!(?options, "Reconcile options");
    let ctx = Arc::new(Context::builder(client.clone()).options(options).build());

    controller::run(client, ctx, args.namespace()).await;
    tracing::info!("Jenkins operator stopped");
    Ok(())
}

//! Jenkins reconciliation

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::{KubeClient, KubeClientImpl, KubeStatusStore};
use crate::configuration::base::{self, BaseOutcome, BaseReconciler};
use crate::configuration::user::{self, UserReconciler};
use crate::configuration::{Progress, ReconcileOptions, JOB_REQUEUE, UPDATE_REQUEUE};
use crate::crd::Jenkins;
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::jenkins::{HttpConnector, JenkinsConnector};
use crate::jobs::StatusStore;
use crate::resources::{watched_owner, LABEL_APP, LABEL_WATCH, OPERATOR_NAME};
use crate::Error;

/// Requeue delay after a status write lost an optimistic concurrency race
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Controller context shared by every reconcile
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .options(ReconcileOptions { local: true, ..Default::default() })
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Builds authenticated Jenkins clients
    pub connector: Arc<dyn JenkinsConnector>,
    /// Publishes events on Jenkins resources
    pub events: Arc<dyn EventPublisher>,
    /// Operator-wide settings
    pub options: ReconcileOptions,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Context with mock seams, for unit tests
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        connector: Arc<dyn JenkinsConnector>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            connector,
            events,
            options: ReconcileOptions::default(),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    connector: Option<Arc<dyn JenkinsConnector>>,
    events: Option<Arc<dyn EventPublisher>>,
    options: ReconcileOptions,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            connector: None,
            events: None,
            options: ReconcileOptions::default(),
        }
    }

    /// Set the operator-wide settings
    pub fn options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the Jenkins connector (primarily for testing)
    pub fn connector(mut self, connector: Arc<dyn JenkinsConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Override the event publisher (primarily for testing)
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            connector: self.connector.unwrap_or_else(|| Arc::new(HttpConnector)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), OPERATOR_NAME))),
            options: self.options,
        }
    }
}

/// Reconcile a Jenkins resource
///
/// Defaults the resource, then runs the base phase and, once the master is
/// configured, the user phase. Each phase stamps its completion time the
/// first time it finishes. Invalid resources and halted phases are reported
/// through events and wait for the resource to change.
#[instrument(skip(jenkins, ctx), fields(jenkins = %jenkins.name_any()))]
pub async fn reconcile(jenkins: Arc<Jenkins>, ctx: Arc<Context>) -> Result<Action, Error> {
    let mut jenkins = (*jenkins).clone();
    debug!("reconciling jenkins");

    if jenkins.spec.apply_defaults() {
        info!("Writing defaults to the resource");
        ctx.kube.replace_jenkins(&jenkins).await?;
        return Ok(Action::requeue(UPDATE_REQUEUE));
    }

    let reference = jenkins.object_ref(&());
    let store = KubeStatusStore::new(ctx.kube.clone());

    let problems = base::validate(ctx.kube.as_ref(), &jenkins).await?;
    if !problems.is_empty() {
        return Ok(invalid(&ctx, &reference, problems).await);
    }

    let base = BaseReconciler::new(
        ctx.kube.as_ref(),
        ctx.connector.as_ref(),
        &store,
        &ctx.options,
    );
    let outcome = match base.reconcile(&mut jenkins).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.events
                .publish(
                    &reference,
                    EventType::Warning,
                    reasons::BASE_CONFIGURATION_FAILURE,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e);
        }
    };
    let api = match outcome {
        BaseOutcome::Ready(api) => api,
        BaseOutcome::Pending(progress) => return Ok(pending(&ctx, &reference, progress).await),
    };

    if !jenkins.base_configuration_completed() {
        jenkins.status_mut().base_configuration_completed_time = Some(Utc::now());
        store.update_status(&mut jenkins).await?;
        info!("Base configuration phase is complete");
        ctx.events
            .publish(
                &reference,
                EventType::Normal,
                reasons::BASE_CONFIGURATION_SUCCESS,
                actions::RECONCILE,
                Some("Base configuration phase is complete".to_string()),
            )
            .await;
    }

    let problems = user::validate(ctx.kube.as_ref(), &jenkins).await?;
    if !problems.is_empty() {
        return Ok(invalid(&ctx, &reference, problems).await);
    }

    let progress = UserReconciler::new(ctx.kube.as_ref(), api.as_ref(), &store, &ctx.options)
        .reconcile(&mut jenkins)
        .await?;
    if !progress.is_done() {
        return Ok(pending(&ctx, &reference, progress).await);
    }

    if !jenkins.user_configuration_completed() {
        jenkins.status_mut().user_configuration_completed_time = Some(Utc::now());
        store.update_status(&mut jenkins).await?;
        info!("User configuration phase is complete");
        ctx.events
            .publish(
                &reference,
                EventType::Normal,
                reasons::USER_CONFIGURATION_SUCCESS,
                actions::RECONCILE,
                Some("User configuration phase is complete".to_string()),
            )
            .await;
    }

    Ok(Action::await_change())
}

async fn invalid(ctx: &Context, reference: &ObjectReference, problems: Vec<String>) -> Action {
    warn!(problems = problems.len(), "Jenkins resource is invalid");
    ctx.events
        .publish(
            reference,
            EventType::Warning,
            reasons::CR_VALIDATION_FAILURE,
            actions::VALIDATE,
            Some(problems.join("; ")),
        )
        .await;
    Action::await_change()
}

async fn pending(ctx: &Context, reference: &ObjectReference, progress: Progress) -> Action {
    match progress {
        Progress::Done => Action::await_change(),
        Progress::Requeue(after) => Action::requeue(after),
        Progress::Halted(reason) => {
            ctx.events
                .publish(
                    reference,
                    EventType::Warning,
                    reasons::JOB_UNRECOVERABLE,
                    actions::RECONCILE,
                    Some(reason),
                )
                .await;
            Action::await_change()
        }
    }
}

/// Decide when a failed reconcile runs again
///
/// Lost status-write races are retried almost immediately from a fresh
/// read; anything else waits for the job requeue delay.
pub fn error_policy(jenkins: Arc<Jenkins>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(jenkins = %jenkins.name_any(), "Status write conflicted, retrying");
        return Action::requeue(CONFLICT_REQUEUE);
    }
    error!(
        ?error,
        jenkins = %jenkins.name_any(),
        "reconciliation failed"
    );
    Action::requeue(JOB_REQUEUE)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Jenkins resource a watched secret or config map belongs to
fn watched_jenkins<K: Resource>(obj: K) -> Option<ObjectRef<Jenkins>> {
    let name = watched_owner(obj.labels())?;
    let namespace = obj.namespace()?;
    Some(ObjectRef::new(&name).within(&namespace))
}

/// Run the Jenkins controller until a shutdown signal arrives
///
/// Watches Jenkins resources in `namespace`, or cluster-wide when None.
pub async fn run(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let watched = WatcherConfig::default().labels(&format!("{LABEL_APP}={OPERATOR_NAME},{LABEL_WATCH}=true"));

    info!(namespace = namespace.unwrap_or("*"), "Starting Jenkins controller");
    Controller::new(api::<Jenkins>(&client, namespace), WatcherConfig::default())
        .owns(api::<Pod>(&client, namespace), WatcherConfig::default())
        .owns(api::<Service>(&client, namespace), WatcherConfig::default())
        .owns(api::<ServiceAccount>(&client, namespace), WatcherConfig::default())
        .owns(api::<Role>(&client, namespace), WatcherConfig::default())
        .owns(api::<RoleBinding>(&client, namespace), WatcherConfig::default())
        .watches(api::<Secret>(&client, namespace), watched.clone(), watched_jenkins)
        .watches(api::<ConfigMap>(&client, namespace), watched, watched_jenkins)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((jenkins, action)) => {
                    debug!(jenkins = %jenkins.name, ?action, "Jenkins reconciliation completed");
                }
                Err(e) => {
                    warn!(error = %e, "Jenkins reconciliation error");
                }
            }
        })
        .await;
    info!("Jenkins controller stopped");
}

//! Kubernetes events emitted on Jenkins resources
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes events about a Jenkins resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish event");
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// The base configuration phase completed
    pub const BASE_CONFIGURATION_SUCCESS: &str = "BaseConfigurationSuccess";
    /// The base configuration phase failed
    pub const BASE_CONFIGURATION_FAILURE: &str = "BaseConfigurationFailure";
    /// The Jenkins resource failed validation
    pub const CR_VALIDATION_FAILURE: &str = "CRValidationFailure";
    /// The user configuration phase completed
    pub const USER_CONFIGURATION_SUCCESS: &str = "UserConfigurationSuccess";
    /// A configuration job failed for good
    pub const JOB_UNRECOVERABLE: &str = "JobUnrecoverable";
}

/// Event actions
pub mod actions {
    /// Reconciling the Jenkins resource
    pub const RECONCILE: &str = "Reconcile";
    /// Validating the Jenkins resource
    pub const VALIDATE: &str = "Validate";
}

//! Service account and RBAC for the master.
//!
//! The kubernetes plugin runs agents as pods in the master's namespace, so
//! the master needs to manage pods and exec into them.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;

use super::{labels, object_meta, resource_name};
use crate::crd::Jenkins;

const ALL_VERBS: &[&str] = &["create", "delete", "get", "list", "patch", "update", "watch"];

fn rule(resource: &str, verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec![resource.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Service account the master pod runs as
pub fn service_account(jenkins: &Jenkins) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(jenkins, resource_name(jenkins), labels(jenkins)),
        ..Default::default()
    }
}

/// Role allowing the master to run agent pods
pub fn role(jenkins: &Jenkins) -> Role {
    Role {
        metadata: object_meta(jenkins, resource_name(jenkins), labels(jenkins)),
        rules: Some(vec![
            rule("pods/portforward", &["create"]),
            rule("pods", ALL_VERBS),
            rule("pods/exec", ALL_VERBS),
            rule("pods/log", &["get", "list", "watch"]),
        ]),
    }
}

/// Binds [`role`] to [`service_account`]
pub fn role_binding(jenkins: &Jenkins) -> RoleBinding {
    let name = resource_name(jenkins);
    RoleBinding {
        metadata: object_meta(jenkins, name.clone(), labels(jenkins)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: jenkins.namespace(),
            ..Default::default()
        }]),
    }
}

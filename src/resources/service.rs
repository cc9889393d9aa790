//! Service exposing the Jenkins master

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{labels, object_meta, resource_name, HTTP_PORT, SLAVE_PORT};
use crate::crd::Jenkins;

/// Service in front of the master pod.
///
/// HTTP is the first port so `minikube service --url` lists it first.
/// With `minikube` the service is a NodePort so an operator running outside
/// the cluster can reach Jenkins.
pub fn master_service(jenkins: &Jenkins, minikube: bool) -> Service {
    let labels = labels(jenkins);
    Service {
        metadata: object_meta(jenkins, resource_name(jenkins), labels.clone()),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            type_: Some(if minikube { "NodePort" } else { "ClusterIP" }.to_string()),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: i32::from(HTTP_PORT),
                    target_port: Some(IntOrString::Int(i32::from(HTTP_PORT))),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("slavelistener".to_string()),
                    port: i32::from(SLAVE_PORT),
                    target_port: Some(IntOrString::Int(i32::from(SLAVE_PORT))),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

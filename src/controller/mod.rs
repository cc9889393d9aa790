//! Controller for Jenkins resources
//!
//! [`reconcile`] runs the base and user configuration phases for one
//! resource. [`run`] wires it into a `kube::runtime::Controller` that also
//! reacts to the objects the operator owns and the user-editable secrets and
//! config maps it watches.

mod client;
mod jenkins;

pub use client::{KubeClient, KubeClientImpl, KubeStatusStore};
pub use jenkins::{error_policy, reconcile, run, Context, ContextBuilder};

#[cfg(test)]
pub use client::MockKubeClient;

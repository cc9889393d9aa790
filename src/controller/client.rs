//! Kubernetes API seam used by the configuration phases

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::crd::Jenkins;
use crate::jobs::StatusStore;
use crate::resources::OPERATOR_NAME;
use crate::{Error, Result};

/// Kubernetes operations needed to run a Jenkins master.
///
/// Objects carry their own namespace in their metadata.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a secret, None when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create a secret
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Replace a secret, failing with a conflict when it changed since read
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Fetch a config map, None when it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a config map
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Server-side apply a config map
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Server-side apply a service
    async fn apply_service(&self, service: &Service) -> Result<()>;

    /// Server-side apply a service account
    async fn apply_service_account(&self, service_account: &ServiceAccount) -> Result<()>;

    /// Server-side apply a role
    async fn apply_role(&self, role: &Role) -> Result<()>;

    /// Server-side apply a role binding
    async fn apply_role_binding(&self, role_binding: &RoleBinding) -> Result<()>;

    /// Fetch a pod, None when it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Create a pod
    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Replace a Jenkins resource (spec and metadata)
    async fn replace_jenkins(&self, jenkins: &Jenkins) -> Result<Jenkins>;

    /// Replace the status of a Jenkins resource
    async fn replace_jenkins_status(&self, jenkins: &Jenkins) -> Result<Jenkins>;
}

/// [`KubeClient`] talking to the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, obj: &K) -> Result<(Api<K>, String)>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let name = obj.name_any();
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::validation(format!("{name} has no namespace")))?;
        Ok((Api::namespaced(self.client.clone(), &namespace), name))
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let (api, _) = self.api(obj)?;
        api.create(&PostParams::default(), obj).await?;
        Ok(())
    }

    async fn apply<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let (api, name) = self.api(obj)?;
        api.patch(
            &name,
            &PatchParams::apply(OPERATOR_NAME).force(),
            &Patch::Apply(obj),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.get_opt(namespace, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.create(secret).await
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        let (api, name) = self.api(secret)?;
        Ok(api.replace(&name, &PostParams::default(), secret).await?)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.get_opt(namespace, name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.create(config_map).await
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.apply(config_map).await
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.apply(service).await
    }

    async fn apply_service_account(&self, service_account: &ServiceAccount) -> Result<()> {
        self.apply(service_account).await
    }

    async fn apply_role(&self, role: &Role) -> Result<()> {
        self.apply(role).await
    }

    async fn apply_role_binding(&self, role_binding: &RoleBinding) -> Result<()> {
        self.apply(role_binding).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.get_opt(namespace, name).await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        self.create(pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn replace_jenkins(&self, jenkins: &Jenkins) -> Result<Jenkins> {
        let (api, name) = self.api(jenkins)?;
        Ok(api.replace(&name, &PostParams::default(), jenkins).await?)
    }

    async fn replace_jenkins_status(&self, jenkins: &Jenkins) -> Result<Jenkins> {
        let (api, name) = self.api(jenkins)?;
        let body = serde_json::to_vec(jenkins)?;
        Ok(api
            .replace_status(&name, &PostParams::default(), body)
            .await?)
    }
}

/// [`StatusStore`] writing the status subresource through a [`KubeClient`].
///
/// The write carries the resource version that was read, so a stale write
/// fails with a conflict.
pub struct KubeStatusStore {
    kube: Arc<dyn KubeClient>,
}

impl KubeStatusStore {
    /// Store writing through `kube`
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl StatusStore for KubeStatusStore {
    async fn update_status(&self, jenkins: &mut Jenkins) -> Result<()> {
        let updated = self.kube.replace_jenkins_status(jenkins).await?;
        jenkins.metadata.resource_version = updated.metadata.resource_version;
        Ok(())
    }
}

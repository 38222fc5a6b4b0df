//! Gateway between the reconcile logic and the Kubernetes API
//!
//! The core only needs get/create/delete of single objects and a way to
//! persist the instance's finalizers. NotFound is reported as a value
//! (`None` / `false`), every other failure as an error.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::object::{ManagedObject, ObjectKind};
use crate::crd::{Iter8, ObjectKey};
use crate::error::{Error, Result};

/// Access to the live cluster state
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an Iter8 instance, `None` if it does not exist
    async fn get_instance(&self, key: &ObjectKey) -> Result<Option<Iter8>>;

    /// Persist the instance's finalizer list
    async fn update_instance(&self, instance: &Iter8) -> Result<()>;

    /// Fetch a managed object, `None` if it does not exist
    async fn get(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ManagedObject>>;

    async fn create(&self, object: &ManagedObject) -> Result<()>;

    /// Delete a managed object; `Ok(false)` when it was already absent
    async fn delete(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> Result<bool>;

    /// Read the data of a Secret, `None` if it does not exist
    async fn get_secret_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>>;
}

/// `ResourceStore` backed by a live kube client
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster_api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    fn namespaced_api<K>(&self, kind: ObjectKind, namespace: Option<&str>) -> Result<Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let namespace = namespace.ok_or_else(|| {
            Error::MissingObjectKey(format!("{} requires a namespace", kind))
        })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

async fn get_named<K>(api: Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn create_object<K>(api: Api<K>, object: &K) -> Result<()>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), object).await?;
    Ok(())
}

async fn delete_named<K>(api: Api<K>, name: &str) -> Result<bool>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
        Err(e) => Err(Error::KubeError(e)),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_instance(&self, key: &ObjectKey) -> Result<Option<Iter8>> {
        let api: Api<Iter8> = Api::namespaced(self.client.clone(), &key.namespace);
        get_named(api, &key.name).await
    }

    async fn update_instance(&self, instance: &Iter8) -> Result<()> {
        let api: Api<Iter8> = Api::namespaced(self.client.clone(), &instance.target_namespace());

        // resourceVersion makes a concurrent writer fail with a conflict
        let patch = json!({
            "metadata": {
                "finalizers": instance.finalizers(),
                "resourceVersion": instance.resource_version(),
            }
        });
        api.patch(
            &instance.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;

        debug!(
            "Persisted finalizers {:?} on Iter8 {}",
            instance.finalizers(),
            instance.name_any()
        );
        Ok(())
    }

    async fn get(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ManagedObject>> {
        let object = match kind {
            ObjectKind::CustomResourceDefinition => get_named(self.cluster_api(), name)
                .await?
                .map(ManagedObject::CustomResourceDefinition),
            ObjectKind::ClusterRole => get_named(self.cluster_api(), name)
                .await?
                .map(ManagedObject::ClusterRole),
            ObjectKind::ClusterRoleBinding => get_named(self.cluster_api(), name)
                .await?
                .map(ManagedObject::ClusterRoleBinding),
            ObjectKind::ServiceAccount => {
                get_named(self.namespaced_api::<ServiceAccount>(kind, namespace)?, name)
                    .await?
                    .map(ManagedObject::ServiceAccount)
            }
            ObjectKind::ConfigMap => {
                get_named(self.namespaced_api::<ConfigMap>(kind, namespace)?, name)
                    .await?
                    .map(ManagedObject::ConfigMap)
            }
            ObjectKind::Service => {
                get_named(self.namespaced_api::<Service>(kind, namespace)?, name)
                    .await?
                    .map(ManagedObject::Service)
            }
            ObjectKind::Deployment => {
                get_named(self.namespaced_api::<Deployment>(kind, namespace)?, name)
                    .await?
                    .map(ManagedObject::Deployment)
            }
        };
        Ok(object)
    }

    async fn create(&self, object: &ManagedObject) -> Result<()> {
        let kind = object.kind();
        let namespace = object.namespace();
        match object {
            ManagedObject::CustomResourceDefinition(o) => {
                create_object(self.cluster_api::<CustomResourceDefinition>(), o).await
            }
            ManagedObject::ClusterRole(o) => {
                create_object(self.cluster_api::<ClusterRole>(), o).await
            }
            ManagedObject::ClusterRoleBinding(o) => {
                create_object(self.cluster_api::<ClusterRoleBinding>(), o).await
            }
            ManagedObject::ServiceAccount(o) => {
                create_object(self.namespaced_api(kind, namespace)?, o).await
            }
            ManagedObject::ConfigMap(o) => {
                create_object(self.namespaced_api(kind, namespace)?, o).await
            }
            ManagedObject::Service(o) => {
                create_object(self.namespaced_api(kind, namespace)?, o).await
            }
            ManagedObject::Deployment(o) => {
                create_object(self.namespaced_api(kind, namespace)?, o).await
            }
        }
    }

    async fn delete(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> Result<bool> {
        match kind {
            ObjectKind::CustomResourceDefinition => {
                delete_named(self.cluster_api::<CustomResourceDefinition>(), name).await
            }
            ObjectKind::ClusterRole => {
                delete_named(self.cluster_api::<ClusterRole>(), name).await
            }
            ObjectKind::ClusterRoleBinding => {
                delete_named(self.cluster_api::<ClusterRoleBinding>(), name).await
            }
            ObjectKind::ServiceAccount => {
                delete_named(self.namespaced_api::<ServiceAccount>(kind, namespace)?, name).await
            }
            ObjectKind::ConfigMap => {
                delete_named(self.namespaced_api::<ConfigMap>(kind, namespace)?, name).await
            }
            ObjectKind::Service => {
                delete_named(self.namespaced_api::<Service>(kind, namespace)?, name).await
            }
            ObjectKind::Deployment => {
                delete_named(self.namespaced_api::<Deployment>(kind, namespace)?, name).await
            }
        }
    }

    async fn get_secret_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = get_named(api, name).await?;
        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }
}

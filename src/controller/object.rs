//! Typed wrapper over the Kubernetes objects the operator manages

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

/// Whether objects of a kind live once per cluster or once per namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Cluster,
    Namespaced,
}

/// Kinds of object the operator creates or deletes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    CustomResourceDefinition,
    ClusterRole,
    ClusterRoleBinding,
    ServiceAccount,
    ConfigMap,
    Service,
    Deployment,
}

impl ObjectKind {
    pub fn scope(&self) -> Scope {
        match self {
            ObjectKind::CustomResourceDefinition
            | ObjectKind::ClusterRole
            | ObjectKind::ClusterRoleBinding => Scope::Cluster,
            ObjectKind::ServiceAccount
            | ObjectKind::ConfigMap
            | ObjectKind::Service
            | ObjectKind::Deployment => Scope::Namespaced,
        }
    }

    /// A namespaced owner can only be referenced by namespaced dependents,
    /// so cluster-scoped kinds are cleaned up through the finalizer instead.
    pub fn supports_owner_references(&self) -> bool {
        self.scope() == Scope::Namespaced
    }

    /// Map a manifest `kind` field onto a managed kind
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "CustomResourceDefinition" => Some(ObjectKind::CustomResourceDefinition),
            "ClusterRole" => Some(ObjectKind::ClusterRole),
            "ClusterRoleBinding" => Some(ObjectKind::ClusterRoleBinding),
            "ServiceAccount" => Some(ObjectKind::ServiceAccount),
            "ConfigMap" => Some(ObjectKind::ConfigMap),
            "Service" => Some(ObjectKind::Service),
            "Deployment" => Some(ObjectKind::Deployment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::CustomResourceDefinition => "CustomResourceDefinition",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Service => "Service",
            ObjectKind::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete object of a managed kind
#[derive(Clone, Debug)]
pub enum ManagedObject {
    CustomResourceDefinition(CustomResourceDefinition),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    ServiceAccount(ServiceAccount),
    ConfigMap(ConfigMap),
    Service(Service),
    Deployment(Deployment),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::CustomResourceDefinition(_) => ObjectKind::CustomResourceDefinition,
            ManagedObject::ClusterRole(_) => ObjectKind::ClusterRole,
            ManagedObject::ClusterRoleBinding(_) => ObjectKind::ClusterRoleBinding,
            ManagedObject::ServiceAccount(_) => ObjectKind::ServiceAccount,
            ManagedObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::CustomResourceDefinition(o) => o.meta(),
            ManagedObject::ClusterRole(o) => o.meta(),
            ManagedObject::ClusterRoleBinding(o) => o.meta(),
            ManagedObject::ServiceAccount(o) => o.meta(),
            ManagedObject::ConfigMap(o) => o.meta(),
            ManagedObject::Service(o) => o.meta(),
            ManagedObject::Deployment(o) => o.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::CustomResourceDefinition(o) => o.meta_mut(),
            ManagedObject::ClusterRole(o) => o.meta_mut(),
            ManagedObject::ClusterRoleBinding(o) => o.meta_mut(),
            ManagedObject::ServiceAccount(o) => o.meta_mut(),
            ManagedObject::ConfigMap(o) => o.meta_mut(),
            ManagedObject::Service(o) => o.meta_mut(),
            ManagedObject::Deployment(o) => o.meta_mut(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }
}

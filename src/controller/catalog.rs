//! The fixed catalog of objects managed for each Iter8 instance
//!
//! Catalog order is provisioning order. Teardown walks the catalog backwards
//! and touches only the kinds that cannot rely on owner references.

use std::fmt;

use super::object::{ObjectKind, Scope};

/// Name of the experiments CRD installed for the iter8 controller
pub const EXPERIMENTS_CRD_NAME: &str = "experiments.iter8.tools";
pub const CONTROLLER_ROLE_NAME: &str = "iter8-controller-role";
pub const CONTROLLER_ROLE_BINDING_NAME: &str = "iter8-controller-rolebinding";

/// Shared name of the controller ServiceAccount, Service and Deployment
pub const CONTROLLER_NAME: &str = "iter8-controller";

/// Shared name of the analytics ConfigMap, Service and Deployment
pub const ANALYTICS_NAME: &str = "iter8-analytics";

pub const NOTIFIERS_CONFIG_MAP_NAME: &str = "iter8config-notifiers";
pub const METRICS_CONFIG_MAP_NAME: &str = "iter8config-metrics";

/// One entry of the managed-object catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ManagedResource {
    ExperimentsCrd,
    ControllerRole,
    ControllerRoleBinding,
    ControllerServiceAccount,
    NotifiersConfigMap,
    MetricsConfigMap,
    ControllerService,
    ControllerDeployment,
    AnalyticsConfigMap,
    AnalyticsService,
    AnalyticsDeployment,
}

/// Every managed resource, in provisioning order
pub const CATALOG: [ManagedResource; 11] = [
    ManagedResource::ExperimentsCrd,
    ManagedResource::ControllerRole,
    ManagedResource::ControllerRoleBinding,
    ManagedResource::ControllerServiceAccount,
    ManagedResource::NotifiersConfigMap,
    ManagedResource::MetricsConfigMap,
    ManagedResource::ControllerService,
    ManagedResource::ControllerDeployment,
    ManagedResource::AnalyticsConfigMap,
    ManagedResource::AnalyticsService,
    ManagedResource::AnalyticsDeployment,
];

impl ManagedResource {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedResource::ExperimentsCrd => ObjectKind::CustomResourceDefinition,
            ManagedResource::ControllerRole => ObjectKind::ClusterRole,
            ManagedResource::ControllerRoleBinding => ObjectKind::ClusterRoleBinding,
            ManagedResource::ControllerServiceAccount => ObjectKind::ServiceAccount,
            ManagedResource::NotifiersConfigMap
            | ManagedResource::MetricsConfigMap
            | ManagedResource::AnalyticsConfigMap => ObjectKind::ConfigMap,
            ManagedResource::ControllerService | ManagedResource::AnalyticsService => {
                ObjectKind::Service
            }
            ManagedResource::ControllerDeployment | ManagedResource::AnalyticsDeployment => {
                ObjectKind::Deployment
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ManagedResource::ExperimentsCrd => EXPERIMENTS_CRD_NAME,
            ManagedResource::ControllerRole => CONTROLLER_ROLE_NAME,
            ManagedResource::ControllerRoleBinding => CONTROLLER_ROLE_BINDING_NAME,
            ManagedResource::ControllerServiceAccount
            | ManagedResource::ControllerService
            | ManagedResource::ControllerDeployment => CONTROLLER_NAME,
            ManagedResource::NotifiersConfigMap => NOTIFIERS_CONFIG_MAP_NAME,
            ManagedResource::MetricsConfigMap => METRICS_CONFIG_MAP_NAME,
            ManagedResource::AnalyticsConfigMap
            | ManagedResource::AnalyticsService
            | ManagedResource::AnalyticsDeployment => ANALYTICS_NAME,
        }
    }

    pub fn supports_owner_references(&self) -> bool {
        self.kind().supports_owner_references()
    }

    /// Namespace the object lives in, `None` for cluster-scoped kinds
    pub fn namespace<'a>(&self, instance_namespace: &'a str) -> Option<&'a str> {
        match self.kind().scope() {
            Scope::Cluster => None,
            Scope::Namespaced => Some(instance_namespace),
        }
    }
}

impl fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

/// Resources removed explicitly by the finalizer, in deletion order
pub fn finalizer_managed() -> impl Iterator<Item = ManagedResource> {
    CATALOG
        .into_iter()
        .rev()
        .filter(|r| !r.supports_owner_references())
}

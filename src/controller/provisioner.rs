//! Ordered provisioning pipeline
//!
//! Runs one ensure step per catalog entry and stops at the first failure.
//! Steps that already ran are left in place; a retried reconcile finds them
//! present and moves on.

use tracing::{debug, error, info};

use super::catalog::{ManagedResource, CATALOG};
use super::ensure::{ensure_from_manifest, ensure_resource, ensure_singleton, EnsureOutcome};
use super::install_guard::InstallGuard;
use super::object::{ManagedObject, Scope};
use super::reconciler::ReconcilerConfig;
use super::resources::{
    build_analytics_config_map, build_analytics_deployment, build_analytics_service,
    build_cluster_role_binding, build_controller_deployment, build_controller_service,
    build_metrics_config_map, build_notifiers_config_map, build_service_account,
    BackendCredentials, HTPASSWD_SECRET_NAME,
};
use super::store::ResourceStore;
use crate::crd::Iter8;
use crate::error::{Error, Result};

/// Outcome of every step that ran, in execution order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub steps: Vec<(ManagedResource, EnsureOutcome)>,
}

impl ProvisionReport {
    /// Resources created by this run
    pub fn created(&self) -> impl Iterator<Item = ManagedResource> + '_ {
        self.steps
            .iter()
            .filter(|(_, outcome)| *outcome == EnsureOutcome::Created)
            .map(|(resource, _)| *resource)
    }

    pub fn is_noop(&self) -> bool {
        self.created().next().is_none()
    }
}

pub struct Provisioner<'a, S: ?Sized> {
    store: &'a S,
    guard: &'a InstallGuard,
    config: &'a ReconcilerConfig,
}

impl<'a, S> Provisioner<'a, S>
where
    S: ResourceStore + ?Sized,
{
    pub fn new(store: &'a S, guard: &'a InstallGuard, config: &'a ReconcilerConfig) -> Self {
        Self {
            store,
            guard,
            config,
        }
    }

    /// Ensure every catalog entry in order
    pub async fn provision(&self, instance: &Iter8) -> Result<ProvisionReport> {
        self.run_steps(instance, &CATALOG).await
    }

    /// Ensure `steps` in the given order, aborting at the first failing step
    pub async fn run_steps(
        &self,
        instance: &Iter8,
        steps: &[ManagedResource],
    ) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();

        for &step in steps {
            match self.ensure_step(instance, step).await {
                Ok(outcome) => report.steps.push((step, outcome)),
                Err(e) => {
                    error!("Failed to ensure {}: {}", step, e);
                    return Err(Error::ProvisioningError {
                        step,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            "Provisioned {} objects, created {}",
            report.steps.len(),
            report.created().count()
        );
        Ok(report)
    }

    async fn ensure_step(&self, instance: &Iter8, step: ManagedResource) -> Result<EnsureOutcome> {
        // Cluster-scoped objects are shared by every instance
        if step.kind().scope() == Scope::Cluster {
            return ensure_singleton(self.store, self.guard, step, || {
                self.ensure_object(instance, step)
            })
            .await;
        }
        self.ensure_object(instance, step).await
    }

    async fn ensure_object(&self, instance: &Iter8, step: ManagedResource) -> Result<EnsureOutcome> {
        let desired = match step {
            ManagedResource::ExperimentsCrd => {
                return ensure_from_manifest(self.store, instance, step, &self.config.crd_manifest)
                    .await;
            }
            ManagedResource::ControllerRole => {
                return ensure_from_manifest(self.store, instance, step, &self.config.role_manifest)
                    .await;
            }
            ManagedResource::ControllerRoleBinding => {
                ManagedObject::ClusterRoleBinding(build_cluster_role_binding(instance))
            }
            ManagedResource::ControllerServiceAccount => {
                ManagedObject::ServiceAccount(build_service_account(instance))
            }
            ManagedResource::NotifiersConfigMap => {
                ManagedObject::ConfigMap(build_notifiers_config_map(instance))
            }
            ManagedResource::MetricsConfigMap => {
                ManagedObject::ConfigMap(build_metrics_config_map(instance)?)
            }
            ManagedResource::ControllerService => {
                ManagedObject::Service(build_controller_service(instance))
            }
            ManagedResource::ControllerDeployment => {
                ManagedObject::Deployment(build_controller_deployment(instance))
            }
            ManagedResource::AnalyticsConfigMap => {
                let credentials = self.backend_credentials(instance).await?;
                ManagedObject::ConfigMap(build_analytics_config_map(
                    instance,
                    credentials.as_ref(),
                )?)
            }
            ManagedResource::AnalyticsService => {
                ManagedObject::Service(build_analytics_service(instance))
            }
            ManagedResource::AnalyticsDeployment => {
                ManagedObject::Deployment(build_analytics_deployment(instance))
            }
        };

        ensure_resource(self.store, instance, desired).await
    }

    async fn backend_credentials(&self, instance: &Iter8) -> Result<Option<BackendCredentials>> {
        let namespace = instance.target_namespace();
        match self
            .store
            .get_secret_data(HTPASSWD_SECRET_NAME, &namespace)
            .await?
        {
            Some(data) => Ok(BackendCredentials::from_secret_data(&data)),
            None => {
                debug!("No secret {} found in {}", HTPASSWD_SECRET_NAME, namespace);
                Ok(None)
            }
        }
    }
}

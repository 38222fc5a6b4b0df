//! Main reconciler for Iter8 resources
//!
//! Implements the controller pattern using kube-rs runtime. The state
//! machine itself only talks to a `ResourceStore`, so it runs unchanged
//! against the cluster and against the in-memory store used in tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use super::catalog::finalizer_managed;
use super::finalizers::{has_finalizer, with_finalizer, without_finalizer, ITER8_FINALIZER};
use super::install_guard::InstallGuard;
use super::provisioner::{ProvisionReport, Provisioner};
use super::store::{KubeStore, ResourceStore};
use crate::crd::{Iter8, ObjectKey};
use crate::error::{Error, Result};

/// Default location of the experiments CRD manifest
pub const DEFAULT_CRD_MANIFEST: &str = "config/crd/experiments.iter8.tools.yaml";

/// Default location of the controller ClusterRole manifest
pub const DEFAULT_ROLE_MANIFEST: &str = "config/rbac/role.yaml";

/// Delay before the reconcile that follows finalizer attachment
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Static inputs of the reconciler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub crd_manifest: PathBuf,
    pub role_manifest: PathBuf,
    pub finalizer: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            crd_manifest: PathBuf::from(DEFAULT_CRD_MANIFEST),
            role_manifest: PathBuf::from(DEFAULT_ROLE_MANIFEST),
            finalizer: ITER8_FINALIZER.to_string(),
        }
    }
}

/// Result of one reconcile pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The instance no longer exists
    InstanceNotFound,
    /// The finalizer was attached; provisioning happens on the next pass
    FinalizerAdded,
    Provisioned(ProvisionReport),
    /// Cluster-scoped objects were removed and the finalizer released
    Finalized,
    /// Being deleted without our finalizer, nothing left to do
    AwaitingDeletion,
}

impl ReconcileOutcome {
    pub fn requeue(&self) -> bool {
        matches!(self, ReconcileOutcome::FinalizerAdded)
    }

    pub fn action(&self) -> Action {
        if self.requeue() {
            Action::requeue(FINALIZER_REQUEUE)
        } else {
            Action::await_change()
        }
    }
}

/// Drives one Iter8 instance toward its declared state
pub struct Reconciler<S> {
    store: Arc<S>,
    guard: Arc<InstallGuard>,
    config: ReconcilerConfig,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            guard: self.guard.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: Arc<S>, guard: Arc<InstallGuard>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            guard,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let instance = match self.store.get_instance(key).await {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                info!("Iter8 {} not found, ignoring since it must have been deleted", key);
                return Ok(ReconcileOutcome::InstanceNotFound);
            }
            Err(e) => {
                error!("Failed to get Iter8 {}: {}", key, e);
                return Err(e);
            }
        };

        let finalizer = self.config.finalizer.as_str();

        if instance.is_being_deleted() {
            return self.finalize(&instance).await;
        }

        if !has_finalizer(&instance, finalizer) {
            info!("Adding finalizer {} to Iter8 {}", finalizer, key);
            self.store
                .update_instance(&with_finalizer(&instance, finalizer))
                .await?;
            return Ok(ReconcileOutcome::FinalizerAdded);
        }

        let report = Provisioner::new(self.store.as_ref(), &self.guard, &self.config)
            .provision(&instance)
            .await?;
        Ok(ReconcileOutcome::Provisioned(report))
    }

    /// Remove the cluster-scoped objects, then release the finalizer
    ///
    /// Objects already gone are skipped. Any other delete failure aborts and
    /// leaves the finalizer attached.
    pub async fn finalize(&self, instance: &Iter8) -> Result<ReconcileOutcome> {
        let finalizer = self.config.finalizer.as_str();
        if !has_finalizer(instance, finalizer) {
            return Ok(ReconcileOutcome::AwaitingDeletion);
        }

        info!("Finalizing Iter8 {}", instance.name_any());
        let namespace = instance.target_namespace();

        for resource in finalizer_managed() {
            let deleted = self
                .store
                .delete(resource.kind(), resource.name(), resource.namespace(&namespace))
                .await
                .map_err(|e| {
                    error!("Unable to delete {}: {}", resource, e);
                    e
                })?;
            if deleted {
                info!("Deleted {}", resource);
            } else {
                warn!("{} already absent", resource);
            }
        }

        info!("Removing finalizer {}", finalizer);
        self.store
            .update_instance(&without_finalizer(instance, finalizer))
            .await?;
        Ok(ReconcileOutcome::Finalized)
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub reconciler: Reconciler<KubeStore>,
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl ControllerState {
    pub fn new(client: Client, config: ReconcilerConfig, watch_namespace: Option<String>) -> Self {
        let store = Arc::new(KubeStore::new(client.clone()));
        Self {
            reconciler: Reconciler::new(store, Arc::new(InstallGuard::new()), config),
            client,
            watch_namespace,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        match &self.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let instances: Api<Iter8> = state.api();

    info!("Starting Iter8 controller");

    // Verify CRD exists
    match instances.list(&Default::default()).await {
        Ok(_) => info!("Iter8 CRD is available"),
        Err(e) => {
            error!("Iter8 CRD not found. Please install the CRD first: {:?}", e);
            return Err(Error::ConfigError("Iter8 CRD not installed".to_string()));
        }
    }

    Controller::new(instances, Config::default())
        // Watch owned resources for changes
        .owns::<Deployment>(state.api(), Config::default())
        .owns::<Service>(state.api(), Config::default())
        .owns::<ConfigMap>(state.api(), Config::default())
        .owns::<ServiceAccount>(state.api(), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(obj: Arc<Iter8>, ctx: Arc<ControllerState>) -> Result<Action> {
    let key = ObjectKey::for_instance(&obj);
    let outcome = ctx.reconciler.reconcile(&key).await?;
    Ok(outcome.action())
}

fn error_policy(instance: Arc<Iter8>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", instance.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}

//! Controller module for Iter8 reconciliation
//! This module contains the controller loop, the reconcile state machine,
//! and the builders and ensurers for every object an Iter8 instance manages.

pub mod catalog;
mod ensure;
mod finalizers;
pub mod install_guard;
pub mod manifests;
pub mod metrics_template;
pub mod object;
mod provisioner;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod resources;
pub mod store;
#[cfg(test)]
mod test_support;

pub use catalog::{finalizer_managed, ManagedResource, CATALOG};
pub use ensure::{ensure_from_manifest, ensure_resource, ensure_singleton, EnsureOutcome};
pub use finalizers::{has_finalizer, with_finalizer, without_finalizer, ITER8_FINALIZER};
pub use install_guard::InstallGuard;
pub use metrics_template::{compile, CompiledMetricsConfig, MetricDescriptor};
pub use object::{ManagedObject, ObjectKind, Scope};
pub use provisioner::{ProvisionReport, Provisioner};
pub use reconciler::{
    run_controller, ControllerState, ReconcileOutcome, Reconciler, ReconcilerConfig,
    DEFAULT_CRD_MANIFEST, DEFAULT_ROLE_MANIFEST,
};
pub use store::{KubeStore, ResourceStore};

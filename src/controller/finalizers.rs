//! Finalizer handling for Iter8 cleanup
//!
//! The finalizer keeps an Iter8 instance around until the cluster-scoped
//! objects it installed (ClusterRoleBinding, ClusterRole, experiments CRD)
//! are gone. Namespaced objects carry owner references and are collected by
//! the garbage collector.

use kube::ResourceExt;

use crate::crd::Iter8;

/// Finalizer name used to protect Iter8 resources
pub const ITER8_FINALIZER: &str = "tools.iter8.iter8-op";

/// Check if the instance has `finalizer`
pub fn has_finalizer(instance: &Iter8, finalizer: &str) -> bool {
    instance.finalizers().iter().any(|f| f == finalizer)
}

/// Copy of the instance with `finalizer` appended, if it was missing
pub fn with_finalizer(instance: &Iter8, finalizer: &str) -> Iter8 {
    let mut updated = instance.clone();
    if !has_finalizer(instance, finalizer) {
        updated.finalizers_mut().push(finalizer.to_string());
    }
    updated
}

/// Copy of the instance with every occurrence of `finalizer` removed
pub fn without_finalizer(instance: &Iter8, finalizer: &str) -> Iter8 {
    let mut updated = instance.clone();
    updated.finalizers_mut().retain(|f| f != finalizer);
    updated
}

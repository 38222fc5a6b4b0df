//! Iter8 Custom Resource Definition
//!
//! An Iter8 instance declares where and how the iter8 controller and
//! analytics engine run, and which metrics the analytics engine knows about.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AnalyticsEngineSpec, ControllerSpec, MetricsSpec};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iter8.iter8.tools",
    version = "v1alpha1",
    kind = "Iter8",
    plural = "iter8s",
    namespaced,
    status = "Iter8Status",
    printcolumn = r#"{"name":"Controller","type":"string","jsonPath":".spec.controller.deployment.image"}"#,
    printcolumn = r#"{"name":"Analytics","type":"string","jsonPath":".spec.analyticsEngine.deployment.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct Iter8Spec {
    /// Namespace the controller watches; the instance namespace when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub controller: ControllerSpec,

    pub analytics_engine: AnalyticsEngineSpec,

    #[serde(default)]
    pub metrics: MetricsSpec,
}

/// Observed state of an Iter8 instance
///
/// The subresource is registered but the operator does not report into it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Iter8Status {}

/// Namespaced name identifying one Iter8 instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn for_instance(instance: &Iter8) -> Self {
        Self::new(
            instance.namespace().unwrap_or_else(|| "default".to_string()),
            instance.name_any(),
        )
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Iter8 {
    /// Namespace holding the instance and every namespaced object it owns
    pub fn target_namespace(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

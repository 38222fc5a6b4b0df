//! Shared types for the Iter8 custom resource
//!
//! Every optional field carries an accessor that applies the documented
//! default, so builders never reach into raw `Option`s.

use std::fmt;

use k8s_openapi::api::core::v1::ResourceRequirements;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default metrics backend type
pub const DEFAULT_BACKEND_TYPE: &str = "prometheus";

/// Default metrics backend URL
pub const DEFAULT_BACKEND_URL: &str = "http://prometheus.istio-system:9090";

/// Default units of a counter metric
pub const DEFAULT_COUNTER_UNITS: &str = "secs";

/// Image pull policy for a managed container
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ImagePullPolicy {
    Always,
    Never,
    IfNotPresent,
}

impl fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePullPolicy::Always => write!(f, "Always"),
            ImagePullPolicy::Never => write!(f, "Never"),
            ImagePullPolicy::IfNotPresent => write!(f, "IfNotPresent"),
        }
    }
}

/// Kubernetes Service type
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

/// Service exposing a managed component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Port on which the service listens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

/// Resolve the port of an optional service, falling back to `default_port`
pub fn service_port(service: Option<&ServiceSpec>, default_port: i32) -> i32 {
    service.and_then(|s| s.port).unwrap_or(default_port)
}

/// Deployment of a managed component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Container image reference
    pub image: String,

    /// Number of replicas, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<ImagePullPolicy>,

    /// Resource requirements copied onto the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<ResourceRequirements>,
}

impl DeploymentSpec {
    pub fn replica_count(&self) -> i32 {
        self.replica_count.unwrap_or(1)
    }

    /// Explicit policy if set; otherwise `Always` for tagged images and
    /// `IfNotPresent` for untagged ones.
    pub fn image_pull_policy(&self) -> ImagePullPolicy {
        if let Some(policy) = self.image_pull_policy {
            return policy;
        }
        if self.image.contains(':') {
            ImagePullPolicy::Always
        } else {
            ImagePullPolicy::IfNotPresent
        }
    }
}

/// The iter8 controller deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,

    pub deployment: DeploymentSpec,
}

/// The iter8 analytics engine deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEngineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,

    pub deployment: DeploymentSpec,

    /// Backend the analytics engine queries for metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_backend: Option<MetricsBackendSpec>,
}

impl AnalyticsEngineSpec {
    /// The metrics backend with every default applied
    pub fn resolved_backend(&self) -> ResolvedMetricsBackend {
        let backend = self.metrics_backend.as_ref();
        let auth = backend.and_then(|b| b.authentication.as_ref());
        let auth_type = auth.and_then(|a| a.auth_type).unwrap_or_default();

        let (username, password) = match auth_type {
            AuthType::Basic => (
                auth.and_then(|a| a.username.clone()).unwrap_or_default(),
                auth.and_then(|a| a.password.clone()).unwrap_or_default(),
            ),
            AuthType::None => (String::new(), String::new()),
        };

        ResolvedMetricsBackend {
            backend_type: backend
                .and_then(|b| b.backend_type.clone())
                .unwrap_or_else(|| DEFAULT_BACKEND_TYPE.to_string()),
            url: backend
                .and_then(|b| b.url.clone())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            auth_type,
            username,
            password,
            insecure_skip_verify: auth.and_then(|a| a.insecure_skip_verify).unwrap_or(false),
        }
    }
}

/// Metrics backend from which the analytics engine collects metrics
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsBackendSpec {
    /// Backend type, defaults to prometheus
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<MetricsBackendAuthenticationSpec>,
}

/// Authentication against the metrics backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsBackendAuthenticationSpec {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
}

/// Authentication mode for the metrics backend
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Basic,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::None => write!(f, "none"),
            AuthType::Basic => write!(f, "basic"),
        }
    }
}

/// Metrics backend settings after defaulting
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMetricsBackend {
    pub backend_type: String,
    pub url: String,
    pub auth_type: AuthType,
    pub username: String,
    pub password: String,
    pub insecure_skip_verify: bool,
}

/// Istio telemetry version producing the metrics
///
/// `v1` is the legacy mode whose query templates are rewritten to the
/// current metric names.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IstioTelemetry {
    V1,
    #[default]
    V2,
}

impl IstioTelemetry {
    pub fn is_legacy(&self) -> bool {
        matches!(self, IstioTelemetry::V1)
    }
}

/// User-declared metrics compiled into analytics query templates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio_telemetry: Option<IstioTelemetry>,

    #[serde(default, rename = "counter")]
    pub counter_metrics: Vec<CounterMetric>,

    #[serde(default, rename = "ratio")]
    pub ratio_metrics: Vec<RatioMetric>,
}

impl MetricsSpec {
    pub fn istio_telemetry(&self) -> IstioTelemetry {
        self.istio_telemetry.unwrap_or_default()
    }
}

/// Whether lower or higher metric values are better
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PreferredDirection {
    Lower,
    #[default]
    Higher,
}

/// A monotonically increasing raw measurement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CounterMetric {
    pub name: String,

    pub query_template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_direction: Option<PreferredDirection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl CounterMetric {
    pub fn preferred_direction(&self) -> PreferredDirection {
        self.preferred_direction.unwrap_or_default()
    }

    pub fn units(&self) -> &str {
        self.units.as_deref().unwrap_or(DEFAULT_COUNTER_UNITS)
    }
}

/// A metric defined as the quotient of two counter metrics
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RatioMetric {
    pub name: String,

    /// Counter metric used as the numerator
    pub numerator: String,

    /// Counter metric used as the denominator
    pub denominator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_direction: Option<PreferredDirection>,

    /// True when the value always lies in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_to_one: Option<bool>,
}

impl RatioMetric {
    pub fn preferred_direction(&self) -> PreferredDirection {
        self.preferred_direction.unwrap_or_default()
    }

    pub fn zero_to_one(&self) -> bool {
        self.zero_to_one.unwrap_or(false)
    }
}

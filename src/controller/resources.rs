//! Kubernetes object builders for Iter8
//!
//! Builders compute the desired state of every namespaced object in the
//! catalog. They never set owner references themselves; `bind_owner` does
//! that right before an object is created.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

use super::catalog::{
    ANALYTICS_NAME, CONTROLLER_NAME, CONTROLLER_ROLE_BINDING_NAME, CONTROLLER_ROLE_NAME,
    METRICS_CONFIG_MAP_NAME, NOTIFIERS_CONFIG_MAP_NAME,
};
use super::metrics_template::{compile, resolved_counter_metrics, resolved_ratio_metrics};
use super::object::ManagedObject;
use crate::crd::{service_port, AuthType, Iter8, ServiceSpec as ComponentService};
use crate::error::Result;

/// Default port of the controller Service
pub const CONTROLLER_DEFAULT_PORT: i32 = 443;

/// Default port of the analytics Service and container
pub const ANALYTICS_DEFAULT_PORT: i32 = 8080;

const CONTROLLER_GRACE_PERIOD_SECONDS: i64 = 10;

/// Secret that, when present, supplies basic-auth credentials for the backend
pub const HTPASSWD_SECRET_NAME: &str = "htpasswd";
const HTPASSWD_PASSWORD_KEY: &str = "rawPassword";
const HTPASSWD_USERNAME: &str = "internal";

/// Key of the analytics engine configuration file
pub const ANALYTICS_CONFIG_FILE: &str = "config.yaml";
const ANALYTICS_CONFIG_VOLUME: &str = "config-volume";

pub const QUERY_TEMPLATES_KEY: &str = "query_templates";
pub const METRICS_KEY: &str = "metrics";
pub const COUNTER_METRICS_KEY: &str = "counter_metrics.yaml";
pub const RATIO_METRICS_KEY: &str = "ratio_metrics.yaml";

/// Create an OwnerReference for garbage collection
pub fn owner_reference(instance: &Iter8) -> OwnerReference {
    OwnerReference {
        api_version: Iter8::api_version(&()).to_string(),
        kind: Iter8::kind(&()).to_string(),
        name: instance.name_any(),
        uid: instance.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Make `instance` the controlling owner of `object`
///
/// Cluster-scoped objects are left untouched; they are removed by the
/// finalizer instead. Binding twice does not duplicate the reference.
pub fn bind_owner(instance: &Iter8, object: &mut ManagedObject) {
    if !object.kind().supports_owner_references() {
        return;
    }

    let reference = owner_reference(instance);
    let owners = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if owners.iter().any(|o| o.uid == reference.uid && o.kind == reference.kind) {
        return;
    }
    owners.push(reference);
}

fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

fn object_meta(
    instance: &Iter8,
    name: &str,
    labels: Option<BTreeMap<String, String>>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(instance.target_namespace()),
        labels,
        ..Default::default()
    }
}

// ============================================================================
// ServiceAccount and ClusterRoleBinding
// ============================================================================

pub fn build_service_account(instance: &Iter8) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(instance, CONTROLLER_NAME, None),
        ..Default::default()
    }
}

/// Bind the controller ClusterRole to the controller ServiceAccount of this instance
pub fn build_cluster_role_binding(instance: &Iter8) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_ROLE_BINDING_NAME.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CONTROLLER_ROLE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: CONTROLLER_NAME.to_string(),
            namespace: Some(instance.target_namespace()),
            ..Default::default()
        }]),
    }
}

// ============================================================================
// ConfigMaps
// ============================================================================

pub fn build_notifiers_config_map(instance: &Iter8) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(instance, NOTIFIERS_CONFIG_MAP_NAME, None),
        ..Default::default()
    }
}

/// Metrics ConfigMap read by the analytics engine at startup
///
/// Carries the compiled `query_templates` and `metrics` documents along with
/// the declared counter and ratio metrics after defaulting.
pub fn build_metrics_config_map(instance: &Iter8) -> Result<ConfigMap> {
    let metrics = &instance.spec.metrics;
    if metrics.istio_telemetry().is_legacy() {
        info!("Istio telemetry v1 selected, rewriting counter query templates");
    }

    let compiled = compile(metrics);
    let mut data = BTreeMap::new();
    data.insert(QUERY_TEMPLATES_KEY.to_string(), compiled.query_templates_yaml()?);
    data.insert(METRICS_KEY.to_string(), compiled.metrics_yaml()?);
    data.insert(
        COUNTER_METRICS_KEY.to_string(),
        serde_yaml::to_string(&resolved_counter_metrics(metrics))?,
    );
    data.insert(
        RATIO_METRICS_KEY.to_string(),
        serde_yaml::to_string(&resolved_ratio_metrics(metrics))?,
    );

    Ok(ConfigMap {
        metadata: object_meta(instance, METRICS_CONFIG_MAP_NAME, None),
        data: Some(data),
        ..Default::default()
    })
}

/// Basic-auth credentials for the metrics backend taken from a Secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCredentials {
    pub username: String,
    pub password: String,
}

impl BackendCredentials {
    /// Read the `htpasswd` Secret layout; `None` unless it has a non-empty password
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Option<Self> {
        let Some(raw) = data.get(HTPASSWD_PASSWORD_KEY) else {
            info!(
                "No field '{}' in secret {}",
                HTPASSWD_PASSWORD_KEY, HTPASSWD_SECRET_NAME
            );
            return None;
        };
        let password = String::from_utf8_lossy(raw).into_owned();
        if password.is_empty() {
            return None;
        }
        Some(Self {
            username: HTPASSWD_USERNAME.to_string(),
            password,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnalyticsConfig {
    port: i32,
    #[serde(rename = "metricsBackend")]
    metrics_backend: AnalyticsBackendConfig,
}

#[derive(Debug, Serialize)]
struct AnalyticsBackendConfig {
    #[serde(rename = "type")]
    backend_type: String,
    url: String,
    auth: AnalyticsAuthConfig,
}

#[derive(Debug, Serialize)]
struct AnalyticsAuthConfig {
    insecure_skip_verify: bool,
    #[serde(rename = "type")]
    auth_type: String,
    ca_file: String,
    token: String,
    username: String,
    password: String,
}

/// Analytics engine configuration file
///
/// Credentials from the `htpasswd` Secret take precedence over the declared
/// authentication and force TLS verification off.
pub fn build_analytics_config_map(
    instance: &Iter8,
    credentials: Option<&BackendCredentials>,
) -> Result<ConfigMap> {
    let engine = &instance.spec.analytics_engine;
    let backend = engine.resolved_backend();

    let mut auth = AnalyticsAuthConfig {
        insecure_skip_verify: backend.insecure_skip_verify,
        auth_type: backend.auth_type.to_string(),
        ca_file: String::new(),
        token: String::new(),
        username: backend.username,
        password: backend.password,
    };
    if let Some(credentials) = credentials {
        debug!("Using metrics backend credentials from secret {}", HTPASSWD_SECRET_NAME);
        auth.auth_type = AuthType::Basic.to_string();
        auth.username = credentials.username.clone();
        auth.password = credentials.password.clone();
        auth.insecure_skip_verify = true;
    }

    let config = AnalyticsConfig {
        port: service_port(engine.service.as_ref(), ANALYTICS_DEFAULT_PORT),
        metrics_backend: AnalyticsBackendConfig {
            backend_type: backend.backend_type,
            url: backend.url,
            auth,
        },
    };

    let labels = BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), ANALYTICS_NAME.to_string()),
        ("app.kubernetes.io/instance".to_string(), ANALYTICS_NAME.to_string()),
    ]);
    let data = BTreeMap::from([(
        ANALYTICS_CONFIG_FILE.to_string(),
        serde_yaml::to_string(&config)?,
    )]);

    Ok(ConfigMap {
        metadata: object_meta(instance, ANALYTICS_NAME, Some(labels)),
        data: Some(data),
        ..Default::default()
    })
}

// ============================================================================
// Services
// ============================================================================

fn build_service(
    instance: &Iter8,
    app: &str,
    service: Option<&ComponentService>,
    default_port: i32,
) -> Service {
    let labels = app_labels(app);
    Service {
        metadata: object_meta(instance, app, Some(labels.clone())),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            type_: service
                .and_then(|s| s.service_type)
                .map(|t| t.to_string()),
            ports: Some(vec![ServicePort {
                port: service_port(service, default_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn build_controller_service(instance: &Iter8) -> Service {
    build_service(
        instance,
        CONTROLLER_NAME,
        instance.spec.controller.service.as_ref(),
        CONTROLLER_DEFAULT_PORT,
    )
}

pub fn build_analytics_service(instance: &Iter8) -> Service {
    build_service(
        instance,
        ANALYTICS_NAME,
        instance.spec.analytics_engine.service.as_ref(),
        ANALYTICS_DEFAULT_PORT,
    )
}

// ============================================================================
// Deployments
// ============================================================================

fn container(name: &str, deployment: &crate::crd::DeploymentSpec) -> Container {
    Container {
        name: name.to_string(),
        image: Some(deployment.image.clone()),
        image_pull_policy: Some(deployment.image_pull_policy().to_string()),
        resources: deployment.resources.clone(),
        ..Default::default()
    }
}

fn build_deployment(
    instance: &Iter8,
    app: &str,
    replicas: i32,
    pod_spec: PodSpec,
) -> Deployment {
    let labels = app_labels(app);
    Deployment {
        metadata: object_meta(instance, app, Some(labels.clone())),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// The iter8 controller Deployment
///
/// `POD_NAMESPACE` is the declared target namespace, or the pod's own
/// namespace through the downward API when none is declared.
pub fn build_controller_deployment(instance: &Iter8) -> Deployment {
    let spec = &instance.spec.controller.deployment;

    let pod_namespace = match instance.spec.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => EnvVar {
            name: "POD_NAMESPACE".to_string(),
            value: Some(namespace.to_string()),
            ..Default::default()
        },
        _ => EnvVar {
            name: "POD_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    };

    let container = Container {
        command: Some(vec!["/manager".to_string()]),
        env: Some(vec![pod_namespace]),
        ..container(CONTROLLER_NAME, spec)
    };

    let pod_spec = PodSpec {
        service_account_name: Some(CONTROLLER_NAME.to_string()),
        termination_grace_period_seconds: Some(CONTROLLER_GRACE_PERIOD_SECONDS),
        containers: vec![container],
        ..Default::default()
    };

    build_deployment(instance, CONTROLLER_NAME, spec.replica_count(), pod_spec)
}

/// The iter8 analytics engine Deployment, configured from the analytics ConfigMap
pub fn build_analytics_deployment(instance: &Iter8) -> Deployment {
    let engine = &instance.spec.analytics_engine;
    let port = service_port(engine.service.as_ref(), ANALYTICS_DEFAULT_PORT);
    let backend = engine.resolved_backend();

    let env = vec![
        EnvVar {
            name: "ITER8_ANALYTICS_SERVER_PORT".to_string(),
            value: Some(port.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "ITER8_ANALYTICS_METRICS_BACKEND_URL".to_string(),
            value: Some(backend.url),
            ..Default::default()
        },
        EnvVar {
            name: "METRICS_BACKEND_CONFIGFILE".to_string(),
            value: Some(ANALYTICS_CONFIG_FILE.to_string()),
            ..Default::default()
        },
    ];

    let container = Container {
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: port,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: ANALYTICS_CONFIG_VOLUME.to_string(),
            mount_path: format!("/{}", ANALYTICS_CONFIG_FILE),
            sub_path: Some(ANALYTICS_CONFIG_FILE.to_string()),
            ..Default::default()
        }]),
        ..container(ANALYTICS_NAME, &engine.deployment)
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        volumes: Some(vec![Volume {
            name: ANALYTICS_CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: ANALYTICS_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    build_deployment(
        instance,
        ANALYTICS_NAME,
        engine.deployment.replica_count(),
        pod_spec,
    )
}

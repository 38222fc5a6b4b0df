//! In-memory `ResourceStore` for reconcile tests
//!
//! Records every call in order and lets a test inject failures for
//! individual objects. `get` yields before answering so that concurrent
//! reconciles interleave the way they would against a real API server.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::error::ErrorResponse;
use kube::ResourceExt;

use super::object::{ManagedObject, ObjectKind};
use super::reconciler::ReconcilerConfig;
use super::store::ResourceStore;
use crate::crd::{
    AnalyticsEngineSpec, ControllerSpec, DeploymentSpec, Iter8, Iter8Spec, ObjectKey,
};
use crate::error::{Error, Result};

type ObjectId = (ObjectKind, Option<String>, String);

/// A call made against the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    GetInstance(ObjectKey),
    UpdateInstance(Vec<String>),
    Get(ObjectKind, String),
    Create(ObjectKind, String),
    Delete(ObjectKind, String),
    GetSecret(String),
}

#[derive(Default)]
struct State {
    instances: BTreeMap<ObjectKey, Iter8>,
    objects: BTreeMap<ObjectId, ManagedObject>,
    secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
    calls: Vec<Call>,
    fail_instance_fetch: bool,
    fail_update: bool,
    fail_secret_read: bool,
    fail_create: BTreeSet<(ObjectKind, String)>,
    fail_delete: BTreeSet<(ObjectKind, String)>,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {}", reason),
        reason: reason.to_string(),
        code,
    }))
}

fn object_id(kind: ObjectKind, name: &str, namespace: Option<&str>) -> ObjectId {
    (kind, namespace.map(str::to_string), name.to_string())
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_instance(&self, instance: Iter8) {
        self.state()
            .instances
            .insert(ObjectKey::for_instance(&instance), instance);
    }

    pub fn instance(&self, key: &ObjectKey) -> Option<Iter8> {
        self.state().instances.get(key).cloned()
    }

    pub fn insert_object(&self, object: ManagedObject) {
        let id = object_id(
            object.kind(),
            object.name().unwrap_or_default(),
            object.namespace(),
        );
        self.state().objects.insert(id, object);
    }

    pub fn object(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<ManagedObject> {
        self.state()
            .objects
            .get(&object_id(kind, name, namespace))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        self.state()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn fail_instance_fetch(&self) {
        self.state().fail_instance_fetch = true;
    }

    pub fn fail_update(&self) {
        self.state().fail_update = true;
    }

    pub fn fail_secret_read(&self) {
        self.state().fail_secret_read = true;
    }

    pub fn fail_create_of(&self, kind: ObjectKind, name: &str) {
        self.state().fail_create.insert((kind, name.to_string()));
    }

    pub fn fail_delete_of(&self, kind: ObjectKind, name: &str) {
        self.state().fail_delete.insert((kind, name.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Successful and failed create attempts, in order
    pub fn creates(&self) -> Vec<(ObjectKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(kind, name) => Some((kind, name)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<(ObjectKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(kind, name) => Some((kind, name)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get_instance(&self, key: &ObjectKey) -> Result<Option<Iter8>> {
        let mut state = self.state();
        state.calls.push(Call::GetInstance(key.clone()));
        if state.fail_instance_fetch {
            return Err(api_error(500, "InternalError"));
        }
        Ok(state.instances.get(key).cloned())
    }

    async fn update_instance(&self, instance: &Iter8) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .push(Call::UpdateInstance(instance.finalizers().to_vec()));
        if state.fail_update {
            return Err(api_error(409, "Conflict"));
        }

        let key = ObjectKey::for_instance(instance);
        // The API server completes a pending deletion once no finalizer is left
        if instance.is_being_deleted() && instance.finalizers().is_empty() {
            state.instances.remove(&key);
        } else {
            state.instances.insert(key, instance.clone());
        }
        Ok(())
    }

    async fn get(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ManagedObject>> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.calls.push(Call::Get(kind, name.to_string()));
        Ok(state.objects.get(&object_id(kind, name, namespace)).cloned())
    }

    async fn create(&self, object: &ManagedObject) -> Result<()> {
        let kind = object.kind();
        let name = object.name().unwrap_or_default().to_string();
        let mut state = self.state();
        state.calls.push(Call::Create(kind, name.clone()));

        if state.fail_create.contains(&(kind, name.clone())) {
            return Err(api_error(500, "InternalError"));
        }
        let id = object_id(kind, &name, object.namespace());
        if state.objects.contains_key(&id) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.objects.insert(id, object.clone());
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> Result<bool> {
        let mut state = self.state();
        state.calls.push(Call::Delete(kind, name.to_string()));
        if state.fail_delete.contains(&(kind, name.to_string())) {
            return Err(api_error(403, "Forbidden"));
        }
        Ok(state
            .objects
            .remove(&object_id(kind, name, namespace))
            .is_some())
    }

    async fn get_secret_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let mut state = self.state();
        state.calls.push(Call::GetSecret(name.to_string()));
        if state.fail_secret_read {
            return Err(api_error(403, "Forbidden"));
        }
        Ok(state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Helper to create a minimal Iter8 instance
pub fn test_instance(name: &str, namespace: &str) -> Iter8 {
    Iter8 {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("test-uid-{}", name)),
            finalizers: Some(vec![]),
            ..Default::default()
        },
        spec: Iter8Spec {
            namespace: None,
            controller: ControllerSpec {
                service: None,
                deployment: DeploymentSpec {
                    image: "iter8/iter8-controller:v1.0.0".to_string(),
                    ..Default::default()
                },
            },
            analytics_engine: AnalyticsEngineSpec {
                service: None,
                deployment: DeploymentSpec {
                    image: "iter8/iter8-analytics:v1.0.0".to_string(),
                    ..Default::default()
                },
                metrics_backend: None,
            },
            metrics: Default::default(),
        },
        status: None,
    }
}

/// Instance that already carries `finalizer`
pub fn finalized_instance(name: &str, namespace: &str, finalizer: &str) -> Iter8 {
    let mut instance = test_instance(name, namespace);
    instance.metadata.finalizers = Some(vec![finalizer.to_string()]);
    instance
}

/// Instance with a deletion timestamp and `finalizer` attached
pub fn deleted_instance(name: &str, namespace: &str, finalizer: &str) -> Iter8 {
    let mut instance = finalized_instance(name, namespace, finalizer);
    instance.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    instance
}

/// Reconciler config pointing at the manifests shipped in `config/`
pub fn test_config() -> ReconcilerConfig {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    ReconcilerConfig {
        crd_manifest: root.join("config/crd/experiments.iter8.tools.yaml"),
        role_manifest: root.join("config/rbac/role.yaml"),
        ..Default::default()
    }
}

//! Loader for the static manifests bundled with the operator
//!
//! The experiments CRD and the controller ClusterRole are shipped as YAML
//! files rather than built in code. Documents that fail to decode, or whose
//! kind the operator does not install, are skipped with a warning.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::object::{ManagedObject, ObjectKind};
use crate::error::{Error, Result};

/// Kinds a bundled manifest may contribute
const ACCEPTED_KINDS: [ObjectKind; 4] = [
    ObjectKind::CustomResourceDefinition,
    ObjectKind::ClusterRole,
    ObjectKind::ClusterRoleBinding,
    ObjectKind::ServiceAccount,
];

/// Read and decode every supported object in a manifest file
pub async fn load_manifest(path: &Path) -> Result<Vec<ManagedObject>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::ManifestError {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(decode_manifest(&raw))
}

/// Load a manifest and pick the object of the given kind and name
pub async fn load_object(path: &Path, kind: ObjectKind, name: &str) -> Result<ManagedObject> {
    load_manifest(path)
        .await?
        .into_iter()
        .find(|o| o.kind() == kind && o.name() == Some(name))
        .ok_or_else(|| Error::ManifestMissing {
            path: path.to_path_buf(),
            kind: kind.to_string(),
            name: name.to_string(),
        })
}

/// Decode a multi-document YAML stream
pub fn decode_manifest(raw: &str) -> Vec<ManagedObject> {
    let mut objects = Vec::new();

    for document in serde_yaml::Deserializer::from_str(raw) {
        let value = match serde_yaml::Value::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                warn!("Error while decoding YAML object, skipping: {}", e);
                continue;
            }
        };
        if value.is_null() {
            continue;
        }

        match decode_object(value) {
            Ok(Some(object)) => objects.push(object),
            Ok(None) => {}
            Err(e) => warn!("Error while decoding manifest object, skipping: {}", e),
        }
    }

    objects
}

fn decode_object(value: serde_yaml::Value) -> Result<Option<ManagedObject>, serde_yaml::Error> {
    let kind_name = value
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or_default()
        .to_string();

    let kind = match ObjectKind::from_kind(&kind_name) {
        Some(kind) if ACCEPTED_KINDS.contains(&kind) => kind,
        _ => {
            warn!(
                "Manifest contains an unsupported object type, skipping: {}",
                kind_name
            );
            return Ok(None);
        }
    };

    let object = match kind {
        ObjectKind::CustomResourceDefinition => {
            ManagedObject::CustomResourceDefinition(serde_yaml::from_value(value)?)
        }
        ObjectKind::ClusterRole => ManagedObject::ClusterRole(serde_yaml::from_value(value)?),
        ObjectKind::ClusterRoleBinding => {
            ManagedObject::ClusterRoleBinding(serde_yaml::from_value(value)?)
        }
        ObjectKind::ServiceAccount => ManagedObject::ServiceAccount(serde_yaml::from_value(value)?),
        ObjectKind::ConfigMap | ObjectKind::Service | ObjectKind::Deployment => return Ok(None),
    };
    Ok(Some(object))
}

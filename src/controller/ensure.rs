//! Create-if-absent for managed objects
//!
//! An existing object is never patched, even when its live state differs
//! from the desired one.

use std::fmt;
use std::future::Future;
use std::path::Path;

use tracing::info;

use super::catalog::ManagedResource;
use super::install_guard::InstallGuard;
use super::manifests::load_object;
use super::object::ManagedObject;
use super::resources::bind_owner;
use super::store::ResourceStore;
use crate::crd::Iter8;
use crate::error::{Error, Result};

/// What an ensure step did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

impl fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsureOutcome::Created => write!(f, "created"),
            EnsureOutcome::AlreadyPresent => write!(f, "already present"),
        }
    }
}

/// Create `desired` unless an object with its kind, name and namespace exists
pub async fn ensure_resource<S>(
    store: &S,
    owner: &Iter8,
    mut desired: ManagedObject,
) -> Result<EnsureOutcome>
where
    S: ResourceStore + ?Sized,
{
    let kind = desired.kind();
    let name = desired
        .name()
        .ok_or_else(|| Error::MissingObjectKey(format!("{} without a name", kind)))?
        .to_string();
    let namespace = desired.namespace().map(str::to_string);

    if store.get(kind, &name, namespace.as_deref()).await?.is_some() {
        info!("{} {} already exists", kind, name);
        return Ok(EnsureOutcome::AlreadyPresent);
    }

    bind_owner(owner, &mut desired);
    info!("Creating {} {}", kind, name);
    store.create(&desired).await?;
    Ok(EnsureOutcome::Created)
}

/// Create a catalog object from a bundled manifest unless it exists
///
/// The manifest is only read when the object is missing.
pub async fn ensure_from_manifest<S>(
    store: &S,
    owner: &Iter8,
    resource: ManagedResource,
    manifest: &Path,
) -> Result<EnsureOutcome>
where
    S: ResourceStore + ?Sized,
{
    let namespace = owner.target_namespace();
    let namespace = resource.namespace(&namespace);

    if store
        .get(resource.kind(), resource.name(), namespace)
        .await?
        .is_some()
    {
        info!("{} already exists", resource);
        return Ok(EnsureOutcome::AlreadyPresent);
    }

    let mut desired = load_object(manifest, resource.kind(), resource.name()).await?;
    if let Some(namespace) = namespace {
        desired.meta_mut().namespace = Some(namespace.to_string());
    }
    bind_owner(owner, &mut desired);

    info!("Creating {} from {}", resource, manifest.display());
    store.create(&desired).await?;
    Ok(EnsureOutcome::Created)
}

/// Run `ensure` for a cluster-scoped singleton shared by every instance
///
/// Callers that observe the object missing serialize on the guard and
/// `ensure` checks again under it, so only the first of them creates it.
pub async fn ensure_singleton<S, F, Fut>(
    store: &S,
    guard: &InstallGuard,
    resource: ManagedResource,
    ensure: F,
) -> Result<EnsureOutcome>
where
    S: ResourceStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<EnsureOutcome>>,
{
    if store
        .get(resource.kind(), resource.name(), None)
        .await?
        .is_some()
    {
        info!("{} already exists", resource);
        return Ok(EnsureOutcome::AlreadyPresent);
    }

    let _held = guard.acquire(&resource.to_string()).await;
    ensure().await
}

//! Serializes installation of cluster-wide singleton objects
//!
//! Several Iter8 instances may reconcile at once and all find the experiments
//! CRD missing. Installation runs under a lock keyed by the object identity so
//! that only one of them creates it; the others re-check under the lock and
//! find it present.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key critical sections for singleton installs
#[derive(Debug, Default)]
pub struct InstallGuard {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InstallGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`; released when the guard drops
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

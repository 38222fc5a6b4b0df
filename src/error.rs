//! Error types for the Iter8 operator

use std::path::PathBuf;

use thiserror::Error;

use crate::controller::ManagedResource;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error other than NotFound
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A bundled manifest could not be read
    #[error("Failed to read manifest {path}: {source}")]
    ManifestError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bundled manifest holds no object the step can install
    #[error("Manifest {path} contains no {kind} named {name}")]
    ManifestMissing {
        path: PathBuf,
        kind: String,
        name: String,
    },

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// An object reached a step without the name or namespace it needs
    #[error("Missing object key: {0}")]
    MissingObjectKey(String),

    /// Invalid operator configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A provisioning step failed; the remaining steps were skipped
    #[error("Provisioning step {step} failed: {source}")]
    ProvisioningError {
        step: ManagedResource,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether retrying the reconcile soon is likely to succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => {
                e.code >= 500 || e.code == 409 || e.code == 429
            }
            Error::KubeError(_) => true,
            Error::ProvisioningError { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    /// Whether this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            Error::ProvisioningError { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
///
/// `NotFound` and `AlreadyExists` are expected outcomes of idempotent
/// reconciliation and are matched on by callers; everything else aborts the
/// current pass.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The write was based on a stale resourceVersion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The object cannot be sent as-is (e.g. missing name or namespace)
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Any other Kubernetes API failure
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// The API could not be reached
    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    /// Classifies a kube error for a read or status write on `what`
    pub fn from_kube(error: kube::Error, what: &str) -> Self {
        match error {
            kube::Error::Api(ref response) if response.code == 404 => Self::NotFound(what.to_string()),
            kube::Error::Api(ref response) if response.code == 409 => Self::Conflict(what.to_string()),
            other => Self::Kube(other),
        }
    }

    /// Classifies a kube error returned by a create of `what`
    pub fn from_kube_create(error: kube::Error, what: &str) -> Self {
        match error {
            kube::Error::Api(ref response) if response.code == 409 => {
                Self::AlreadyExists(what.to_string())
            }
            other => Self::from_kube(other, what),
        }
    }

    /// Whether the object was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether a create lost to an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

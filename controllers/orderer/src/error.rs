//! Controller-specific error types.
//!
//! Errors from the cluster client, the template store and the resource
//! factory are wrapped here so a failed pass can be logged and requeued with
//! one type.

use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

use crate::reconciler::factory::FactoryError;
use crate::templates::TemplateError;

/// Errors that can occur in the Orderer Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster API error
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Kubernetes client error (client construction, watch streams)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Template store error
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// An owned object could not be built
    #[error("Build failed: {0}")]
    Factory(#[from] FactoryError),

    /// The shared fabric configuration could not be ensured
    #[error("Configuration prerequisite failed for {namespace}: {source}")]
    Configuration {
        namespace: String,
        #[source]
        source: Box<ControllerError>,
    },

    /// Invalid process configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// A background task stopped
    #[error("{0}")]
    Task(String),

    /// Socket or signal handling failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

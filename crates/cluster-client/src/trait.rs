//! ClusterClient trait for mocking
//!
//! This trait abstracts cluster access so reconcilers can be unit tested.
//! The concrete [`KubeClusterClient`](crate::KubeClusterClient) implements it
//! over `kube::Client`, and tests use `MockClusterClient`.

use crate::error::ClusterError;
use crate::models::ObjectKey;
use crds::Orderer;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};

/// Cluster API operations used by the fabric operator
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Creates take the full object; its metadata must carry name and namespace.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Orderer
    /// Reads the Orderer at `key`
    async fn get_orderer(&self, key: &ObjectKey) -> Result<Orderer, ClusterError>;
    /// Writes the status subresource. Rejected with `Conflict` when the
    /// object's resourceVersion is stale.
    async fn update_orderer_status(&self, orderer: &Orderer) -> Result<Orderer, ClusterError>;

    // Owned objects
    /// Reads the Secret at `key`
    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, ClusterError>;
    /// Creates `secret`; `AlreadyExists` if the name is taken
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;
    /// Reads the Service at `key`
    async fn get_service(&self, key: &ObjectKey) -> Result<Service, ClusterError>;
    /// Creates `service` and returns it with any node ports the platform assigned
    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError>;
    /// Reads the StatefulSet at `key`
    async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError>;
    /// Creates `stateful_set`; `AlreadyExists` if the name is taken
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError>;

    // Shared configuration
    /// Reads the ConfigMap at `key`
    async fn get_config_map(&self, key: &ObjectKey) -> Result<ConfigMap, ClusterError>;
    /// Creates `config_map`; `AlreadyExists` if the name is taken
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError>;

    /// Addresses of the cluster's nodes that can receive NodePort traffic
    async fn list_node_addresses(&self) -> Result<Vec<String>, ClusterError>;
}

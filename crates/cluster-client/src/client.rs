//! Kubernetes-backed cluster client

use std::fmt::Debug;

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::models::ObjectKey;
use crds::Orderer;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Address type preferred for reaching NodePort services from outside
const EXTERNAL_IP: &str = "ExternalIP";
/// Address type used when no node reports an external address
const INTERNAL_IP: &str = "InternalIP";

/// Cluster client over a `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn describe<K>(key: &ObjectKey) -> String
    where
        K: Resource<DynamicType = ()>,
    {
        format!("{} {}", K::kind(&()), key)
    }

    async fn get<K>(&self, key: &ObjectKey) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &Self::describe::<K>(key)))
    }

    async fn create<K>(&self, object: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let key = ObjectKey::from_resource(object).ok_or_else(|| {
            ClusterError::InvalidObject(format!("{} without name or namespace", K::kind(&())))
        })?;
        debug!("Creating {}", Self::describe::<K>(&key));
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| ClusterError::from_kube_create(e, &Self::describe::<K>(&key)))
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_orderer(&self, key: &ObjectKey) -> Result<Orderer, ClusterError> {
        self.get(key).await
    }

    async fn update_orderer_status(&self, orderer: &Orderer) -> Result<Orderer, ClusterError> {
        let key = ObjectKey::from_resource(orderer).ok_or_else(|| {
            ClusterError::InvalidObject("Orderer without name or namespace".to_string())
        })?;
        // Carrying resourceVersion makes the API server reject stale writers with 409
        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": orderer.metadata.resource_version },
            "status": orderer.status,
        });
        let api: Api<Orderer> = Api::namespaced(self.client.clone(), &key.namespace);
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, &Self::describe::<Orderer>(&key)))
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, ClusterError> {
        self.get(key).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.create(secret).await
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Service, ClusterError> {
        self.get(key).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        self.create(service).await
    }

    async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError> {
        self.get(key).await
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        self.create(stateful_set).await
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<ConfigMap, ClusterError> {
        self.get(key).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create(config_map).await
    }

    async fn list_node_addresses(&self) -> Result<Vec<String>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::from_kube(e, "Node list"))?;
        Ok(node_addresses(&nodes.items))
    }
}

/// Collects the external addresses of `nodes`, or their internal addresses
/// when no node has an external one. Order follows the node list.
pub fn node_addresses(nodes: &[Node]) -> Vec<String> {
    let addresses_of_type = |address_type: &str| {
        let mut found: Vec<String> = Vec::new();
        for address in nodes
            .iter()
            .filter_map(|node| node.status.as_ref()?.addresses.as_ref())
            .flatten()
            .filter(|address| address.type_ == address_type)
        {
            if !address.address.is_empty() && !found.contains(&address.address) {
                found.push(address.address.clone());
            }
        }
        found
    };

    let external = addresses_of_type(EXTERNAL_IP);
    if external.is_empty() {
        addresses_of_type(INTERNAL_IP)
    } else {
        external
    }
}

//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of [`ClusterClientTrait`]
//! that behaves like the API server as far as reconcilers can observe:
//! creates assign `uid` and `resourceVersion` and reject duplicates, NodePort
//! services get ports, and status writes with a stale `resourceVersion` are
//! rejected. Creates yield once before writing, so concurrent passes
//! interleave. Faults can be injected per operation.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::models::ObjectKey;
use crds::Orderer;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// First port handed out to NodePort services
const FIRST_NODE_PORT: i32 = 31000;

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetOrderer,
    UpdateOrdererStatus,
    GetSecret,
    CreateSecret,
    GetService,
    CreateService,
    GetStatefulSet,
    CreateStatefulSet,
    GetConfigMap,
    CreateConfigMap,
    ListNodeAddresses,
}

type Store<K> = Arc<Mutex<HashMap<ObjectKey, K>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock ClusterClient for testing
///
/// Clones share the same store, so a test can hand one clone to the code
/// under test and inspect the other.
#[derive(Debug, Clone)]
pub struct MockClusterClient {
    orderers: Store<Orderer>,
    secrets: Store<Secret>,
    services: Store<Service>,
    stateful_sets: Store<StatefulSet>,
    config_maps: Store<ConfigMap>,
    node_addresses: Arc<Mutex<Vec<String>>>,
    auto_assign_node_ports: Arc<Mutex<bool>>,
    next_node_port: Arc<Mutex<i32>>,
    next_resource_version: Arc<Mutex<u64>>,
    failures: Arc<Mutex<HashMap<MockOperation, String>>>,
    lost_races: Arc<Mutex<HashSet<MockOperation>>>,
    creates: Arc<Mutex<HashMap<String, usize>>>,
    status_updates: Arc<Mutex<usize>>,
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClusterClient {
    /// Create an empty cluster with no nodes
    pub fn new() -> Self {
        Self {
            orderers: Arc::default(),
            secrets: Arc::default(),
            services: Arc::default(),
            stateful_sets: Arc::default(),
            config_maps: Arc::default(),
            node_addresses: Arc::default(),
            auto_assign_node_ports: Arc::new(Mutex::new(true)),
            next_node_port: Arc::new(Mutex::new(FIRST_NODE_PORT)),
            next_resource_version: Arc::new(Mutex::new(1)),
            failures: Arc::default(),
            lost_races: Arc::default(),
            creates: Arc::default(),
            status_updates: Arc::default(),
        }
    }

    // ---- test setup ----

    /// Store an Orderer as if a user had applied it; returns the stored copy
    pub fn add_orderer(&self, orderer: Orderer) -> Orderer {
        let mut stored = orderer;
        self.stamp_new(&mut stored.metadata);
        if let Some(key) = ObjectKey::from_resource(&stored) {
            lock(&self.orderers).insert(key, stored.clone());
        }
        stored
    }

    /// Apply a change to a stored Orderer, bumping its resourceVersion
    pub fn modify_orderer(&self, key: &ObjectKey, change: impl FnOnce(&mut Orderer)) {
        let version = self.next_resource_version();
        if let Some(orderer) = lock(&self.orderers).get_mut(key) {
            change(orderer);
            orderer.metadata.resource_version = Some(version);
        }
    }

    /// Delete an Orderer; owned objects stay, as garbage collection is the platform's job
    pub fn remove_orderer(&self, key: &ObjectKey) {
        lock(&self.orderers).remove(key);
    }

    /// Store a Secret directly (no create is counted)
    pub fn add_secret(&self, secret: Secret) {
        self.add_existing(&self.secrets, secret);
    }

    /// Store a Service directly (no create is counted, no port is assigned)
    pub fn add_service(&self, service: Service) {
        self.add_existing(&self.services, service);
    }

    /// Store a StatefulSet directly (no create is counted)
    pub fn add_stateful_set(&self, stateful_set: StatefulSet) {
        self.add_existing(&self.stateful_sets, stateful_set);
    }

    /// Store a ConfigMap directly (no create is counted)
    pub fn add_config_map(&self, config_map: ConfigMap) {
        self.add_existing(&self.config_maps, config_map);
    }

    pub fn set_node_addresses(&self, addresses: Vec<String>) {
        *lock(&self.node_addresses) = addresses;
    }

    /// Whether newly created NodePort services get ports immediately
    pub fn set_auto_assign_node_ports(&self, enabled: bool) {
        *lock(&self.auto_assign_node_ports) = enabled;
    }

    /// Set the node port of every port of a stored service
    pub fn assign_node_port(&self, key: &ObjectKey, node_port: i32) {
        if let Some(ports) = lock(&self.services)
            .get_mut(key)
            .and_then(|service| service.spec.as_mut())
            .and_then(|spec| spec.ports.as_mut())
        {
            for port in ports {
                port.node_port = Some(node_port);
            }
        }
    }

    /// Make `operation` fail with `Unavailable(message)` until cleared
    pub fn fail(&self, operation: MockOperation, message: impl Into<String>) {
        lock(&self.failures).insert(operation, message.into());
    }

    pub fn clear_failure(&self, operation: MockOperation) {
        lock(&self.failures).remove(&operation);
    }

    /// The next create for `operation` loses a race: a concurrent writer's
    /// object is stored first and the caller gets `AlreadyExists`
    pub fn lose_next_create_race(&self, operation: MockOperation) {
        lock(&self.lost_races).insert(operation);
    }

    // ---- inspection ----

    pub fn orderer(&self, key: &ObjectKey) -> Option<Orderer> {
        lock(&self.orderers).get(key).cloned()
    }

    pub fn secret(&self, key: &ObjectKey) -> Option<Secret> {
        lock(&self.secrets).get(key).cloned()
    }

    pub fn service(&self, key: &ObjectKey) -> Option<Service> {
        lock(&self.services).get(key).cloned()
    }

    pub fn stateful_set(&self, key: &ObjectKey) -> Option<StatefulSet> {
        lock(&self.stateful_sets).get(key).cloned()
    }

    pub fn config_map(&self, key: &ObjectKey) -> Option<ConfigMap> {
        lock(&self.config_maps).get(key).cloned()
    }

    /// Number of successful creates of `kind` (e.g. "StatefulSet")
    pub fn creates(&self, kind: &str) -> usize {
        lock(&self.creates).get(kind).copied().unwrap_or(0)
    }

    /// Number of accepted Orderer status writes
    pub fn status_updates(&self) -> usize {
        *lock(&self.status_updates)
    }

    // ---- internals ----

    fn next_resource_version(&self) -> String {
        let mut version = lock(&self.next_resource_version);
        let current = *version;
        *version += 1;
        current.to_string()
    }

    fn stamp_new(&self, meta: &mut ObjectMeta) {
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(self.next_resource_version());
    }

    fn check(&self, operation: MockOperation) -> Result<(), ClusterError> {
        match lock(&self.failures).get(&operation) {
            Some(message) => Err(ClusterError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    fn add_existing<K>(&self, store: &Store<K>, object: K)
    where
        K: Resource + Clone,
    {
        let mut stored = object;
        self.stamp_new(stored.meta_mut());
        if let Some(key) = ObjectKey::from_resource(&stored) {
            lock(store).insert(key, stored);
        }
    }

    fn get_from<K>(&self, store: &Store<K>, key: &ObjectKey, operation: MockOperation) -> Result<K, ClusterError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        self.check(operation)?;
        lock(store)
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} {}", K::kind(&()), key)))
    }

    async fn create_in<K>(&self, store: &Store<K>, object: &K, operation: MockOperation) -> Result<K, ClusterError>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        self.check(operation)?;
        // Creates are round trips: let other passes run between the caller's
        // existence check and the write
        tokio::task::yield_now().await;
        let kind = K::kind(&()).to_string();
        let key = ObjectKey::from_resource(object)
            .ok_or_else(|| ClusterError::InvalidObject(format!("{kind} without name or namespace")))?;

        let mut stored = object.clone();
        self.stamp_new(stored.meta_mut());

        let mut objects = lock(store);
        if objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{kind} {key}")));
        }
        objects.insert(key.clone(), stored.clone());
        *lock(&self.creates).entry(kind.clone()).or_default() += 1;

        if lock(&self.lost_races).remove(&operation) {
            // The stored object is the concurrent winner's; this caller lost
            return Err(ClusterError::AlreadyExists(format!("{kind} {key}")));
        }
        Ok(stored)
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_orderer(&self, key: &ObjectKey) -> Result<Orderer, ClusterError> {
        self.get_from(&self.orderers, key, MockOperation::GetOrderer)
    }

    async fn update_orderer_status(&self, orderer: &Orderer) -> Result<Orderer, ClusterError> {
        self.check(MockOperation::UpdateOrdererStatus)?;
        let key = ObjectKey::from_resource(orderer)
            .ok_or_else(|| ClusterError::InvalidObject("Orderer without name or namespace".to_string()))?;
        let version = self.next_resource_version();

        let mut orderers = lock(&self.orderers);
        let stored = orderers
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(format!("Orderer {key}")))?;
        if orderer.metadata.resource_version.is_some()
            && orderer.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(ClusterError::Conflict(format!("Orderer {key}")));
        }
        stored.status = orderer.status.clone();
        stored.metadata.resource_version = Some(version);
        *lock(&self.status_updates) += 1;
        Ok(stored.clone())
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, ClusterError> {
        self.get_from(&self.secrets, key, MockOperation::GetSecret)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.create_in(&self.secrets, secret, MockOperation::CreateSecret).await
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Service, ClusterError> {
        self.get_from(&self.services, key, MockOperation::GetService)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        let mut service = service.clone();
        let is_node_port = service
            .spec
            .as_ref()
            .and_then(|spec| spec.type_.as_deref())
            .is_some_and(|type_| type_ == "NodePort" || type_ == "LoadBalancer");
        if is_node_port && *lock(&self.auto_assign_node_ports) {
            if let Some(ports) = service.spec.as_mut().and_then(|spec| spec.ports.as_mut()) {
                let mut next = lock(&self.next_node_port);
                for port in ports.iter_mut().filter(|port| port.node_port.is_none()) {
                    port.node_port = Some(*next);
                    *next += 1;
                }
            }
        }
        self.create_in(&self.services, &service, MockOperation::CreateService).await
    }

    async fn get_stateful_set(&self, key: &ObjectKey) -> Result<StatefulSet, ClusterError> {
        self.get_from(&self.stateful_sets, key, MockOperation::GetStatefulSet)
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        self.create_in(&self.stateful_sets, stateful_set, MockOperation::CreateStatefulSet).await
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<ConfigMap, ClusterError> {
        self.get_from(&self.config_maps, key, MockOperation::GetConfigMap)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create_in(&self.config_maps, config_map, MockOperation::CreateConfigMap).await
    }

    async fn list_node_addresses(&self) -> Result<Vec<String>, ClusterError> {
        self.check(MockOperation::ListNodeAddresses)?;
        Ok(lock(&self.node_addresses).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{OrdererSpec, OrdererStatus};
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    fn orderer(namespace: &str, name: &str) -> Orderer {
        let mut orderer = Orderer::new(name, OrdererSpec::default());
        orderer.metadata.namespace = Some(namespace.to_string());
        orderer
    }

    #[tokio::test]
    async fn test_create_then_duplicate_is_already_exists() {
        let client = MockClusterClient::new();
        let secret = Secret {
            metadata: meta("fabric", "orderer0-secret"),
            ..Default::default()
        };

        let created = client.create_secret(&secret).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());

        let err = client.create_secret(&secret).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(client.creates("Secret"), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let client = MockClusterClient::new();
        let err = client
            .get_stateful_set(&ObjectKey::new("fabric", "orderer0"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_node_port_services_get_ports() {
        let client = MockClusterClient::new();
        let service = Service {
            metadata: meta("fabric", "orderer0"),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 7050,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = client.create_service(&service).await.unwrap();
        let ports = created.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].node_port, Some(FIRST_NODE_PORT));
    }

    #[tokio::test]
    async fn test_node_port_assignment_can_be_deferred() {
        let client = MockClusterClient::new();
        client.set_auto_assign_node_ports(false);
        let key = ObjectKey::new("fabric", "orderer0");
        let service = Service {
            metadata: meta("fabric", "orderer0"),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 7050,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        client.create_service(&service).await.unwrap();
        let stored = client.service(&key).unwrap();
        assert_eq!(stored.spec.unwrap().ports.unwrap()[0].node_port, None);

        client.assign_node_port(&key, 32000);
        let stored = client.service(&key).unwrap();
        assert_eq!(stored.spec.unwrap().ports.unwrap()[0].node_port, Some(32000));
    }

    #[tokio::test]
    async fn test_stale_status_write_conflicts() {
        let client = MockClusterClient::new();
        let key = ObjectKey::new("fabric", "orderer0");
        let mut stale = client.add_orderer(orderer("fabric", "orderer0"));

        client.modify_orderer(&key, |o| o.spec.hosts = vec!["orderer.example.com".to_string()]);

        stale.status = Some(OrdererStatus {
            access_point: "31000".to_string(),
        });
        let err = client.update_orderer_status(&stale).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));

        let mut fresh = client.orderer(&key).unwrap();
        fresh.status = stale.status.clone();
        let updated = client.update_orderer_status(&fresh).await.unwrap();
        assert_eq!(updated.access_point(), "31000");
        assert_eq!(client.status_updates(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_until_cleared() {
        let client = MockClusterClient::new();
        client.fail(MockOperation::ListNodeAddresses, "connection refused");
        assert!(matches!(
            client.list_node_addresses().await,
            Err(ClusterError::Unavailable(_))
        ));

        client.clear_failure(MockOperation::ListNodeAddresses);
        client.set_node_addresses(vec!["10.0.0.5".to_string()]);
        assert_eq!(client.list_node_addresses().await.unwrap(), vec!["10.0.0.5"]);
    }

    #[tokio::test]
    async fn test_lost_race_stores_winner_and_reports_already_exists() {
        let client = MockClusterClient::new();
        client.lose_next_create_race(MockOperation::CreateStatefulSet);
        let stateful_set = StatefulSet {
            metadata: meta("fabric", "orderer0"),
            ..Default::default()
        };

        let err = client.create_stateful_set(&stateful_set).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(client.stateful_set(&ObjectKey::new("fabric", "orderer0")).is_some());
        assert_eq!(client.creates("StatefulSet"), 1);

        // Only the next create loses
        let other = StatefulSet {
            metadata: meta("fabric", "orderer1"),
            ..Default::default()
        };
        assert!(client.create_stateful_set(&other).await.is_ok());
    }
}

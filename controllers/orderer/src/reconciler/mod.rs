//! Reconciliation logic for Orderers.
//!
//! One pass walks the Orderer's owned objects in a fixed order: credential
//! bundle, network endpoint, access point, workload set. Each step checks
//! whether its object exists by name and creates it if not, so a pass can be
//! repeated, interrupted or run twice without harm. Nothing is remembered
//! between passes; progress is read back from the cluster every time.

pub mod factory;

use cluster_client::{ClusterClientTrait, ClusterError, ObjectKey};
use crds::{Orderer, OrdererStatus};
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info, instrument, warn};

use crate::access_point::{NodePortState, compute_access_point};
use crate::configuration::ensure_configuration_present;
use crate::error::ControllerError;
use factory::{FactoryError, ResourceFactory, secret_name};

/// How a pass that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the next change
    Done,
    /// Waiting on the platform (e.g. port assignment); run again later
    Requeue,
}

/// Reconciles Orderer resources.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClientTrait>,
    factory: ResourceFactory,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler writing through `client` with objects built by `factory`
    pub fn new(client: Box<dyn ClusterClientTrait>, factory: ResourceFactory) -> Self {
        Self { client, factory }
    }

    /// Runs one reconciliation pass for the Orderer at `key`
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ControllerError> {
        ensure_configuration_present(self.client.as_ref(), &self.factory, &key.namespace).await?;

        let orderer = match self.client.get_orderer(key).await {
            Ok(orderer) => orderer,
            Err(e) if e.is_not_found() => {
                // Owned objects are garbage-collected through their owner references
                info!("Orderer not found, assuming it was deleted");
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(e.into()),
        };

        self.ensure_credential_bundle(&orderer, key).await?;
        let service = self.ensure_network_endpoint(&orderer, key).await?;

        let port = NodePortState::of(&service);
        if port == NodePortState::NoPorts {
            debug!("Service has no ports yet");
            return Ok(ReconcileOutcome::Requeue);
        }

        if orderer.access_point().is_empty() {
            let NodePortState::Assigned(node_port) = port else {
                debug!("Node port not assigned yet");
                return Ok(ReconcileOutcome::Requeue);
            };
            self.record_access_point(key, node_port).await?;
        }

        self.ensure_workload_set(&orderer, key).await?;
        Ok(ReconcileOutcome::Done)
    }

    /// Creates `<name>-secret` unless it exists. An Orderer without its full
    /// MSP and TLS material gets no bundle and the pass carries on.
    async fn ensure_credential_bundle(&self, orderer: &Orderer, key: &ObjectKey) -> Result<(), ControllerError> {
        let secret_key = key.sibling(secret_name(&key.name));
        match self.client.get_secret(&secret_key).await {
            Ok(_) => {
                debug!(secret = %secret_key.name, "Credential bundle exists");
                return Ok(());
            }
            Err(ClusterError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let secret = match self.factory.build_credential_bundle(orderer, key) {
            Ok(secret) => secret,
            Err(e @ FactoryError::MissingCredentials(_)) => {
                warn!(secret = %secret_key.name, "Not creating credential bundle: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match self.client.create_secret(&secret).await {
            Ok(_) => info!(secret = %secret_key.name, "Created credential bundle"),
            Err(e) if e.is_already_exists() => {
                debug!(secret = %secret_key.name, "Credential bundle created concurrently");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Returns the Orderer's service, creating it if needed
    async fn ensure_network_endpoint(&self, orderer: &Orderer, key: &ObjectKey) -> Result<Service, ControllerError> {
        match self.client.get_service(key).await {
            Ok(service) => return Ok(service),
            Err(ClusterError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let service = self.factory.build_network_endpoint(orderer, key)?;
        match self.client.create_service(&service).await {
            Ok(created) => {
                info!(service = %key.name, "Created service");
                Ok(created)
            }
            Err(e) if e.is_already_exists() => {
                debug!(service = %key.name, "Service created concurrently");
                Ok(self.client.get_service(key).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Computes and stores the access point once. The Orderer is read again
    /// so the write carries its latest resourceVersion; a value stored in the
    /// meantime is kept.
    async fn record_access_point(&self, key: &ObjectKey, node_port: i32) -> Result<(), ControllerError> {
        let mut orderer = self.client.get_orderer(key).await?;
        if !orderer.access_point().is_empty() {
            debug!(access_point = orderer.access_point(), "Access point already recorded");
            return Ok(());
        }

        let platform_hosts = self.client.list_node_addresses().await?;
        let access_point = compute_access_point(node_port, &orderer.spec.hosts, &platform_hosts);
        orderer.status = Some(OrdererStatus {
            access_point: access_point.clone(),
        });
        self.client.update_orderer_status(&orderer).await?;
        info!(node_port, access_point = %access_point, "Recorded access point");
        Ok(())
    }

    async fn ensure_workload_set(&self, orderer: &Orderer, key: &ObjectKey) -> Result<(), ControllerError> {
        match self.client.get_stateful_set(key).await {
            Ok(_) => {
                debug!(stateful_set = %key.name, "Workload set exists");
                return Ok(());
            }
            Err(ClusterError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let stateful_set = self.factory.build_workload_set(orderer, key)?;
        match self.client.create_stateful_set(&stateful_set).await {
            Ok(_) => info!(stateful_set = %key.name, "Created workload set"),
            Err(e) if e.is_already_exists() => {
                debug!(stateful_set = %key.name, "Workload set created concurrently");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

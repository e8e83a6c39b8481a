//! Kubernetes resource watchers.
//!
//! This module watches Orderers and the objects they own, and turns every
//! change into a reconciliation request for the Orderer concerned.

use std::fmt::Debug;
use std::sync::Arc;

use cluster_client::ObjectKey;
use crds::{API_GROUP, Orderer};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{Api, Client, Resource};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ControllerError;
use crate::reconciler::factory::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Selects the objects the factory labels as owned by this controller
pub fn managed_by_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}

/// Key of the Orderer that controls `object`, if any
pub fn controlling_orderer<K: Resource>(object: &K) -> Option<ObjectKey> {
    let meta = object.meta();
    let owner = meta.owner_references.as_ref()?.iter().find(|owner| {
        owner.controller == Some(true)
            && owner.kind == Orderer::kind(&())
            && owner.api_version.split('/').next() == Some(API_GROUP)
    })?;
    Some(ObjectKey::new(meta.namespace.clone()?, owner.name.clone()))
}

/// Follows one kind's watch stream and enqueues the keys `key_of` maps events to.
///
/// Stream errors are logged; the stream backs off and resumes by itself.
async fn watch_kind<K, F>(
    api: Api<K>,
    config: watcher::Config,
    dispatcher: Arc<dyn Dispatcher>,
    kind: &'static str,
    key_of: F,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(&K) -> Option<ObjectKey>,
{
    info!("Starting {} watcher", kind);

    let mut stream = std::pin::pin!(watcher(api, config).default_backoff());
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(object))
            | Ok(watcher::Event::InitApply(object))
            | Ok(watcher::Event::Delete(object)) => {
                if let Some(key) = key_of(&object) {
                    debug!(key = %key, "{} changed", kind);
                    dispatcher.enqueue(key);
                }
            }
            Ok(watcher::Event::Init) => {
                debug!("{} watcher initializing", kind);
            }
            Ok(watcher::Event::InitDone) => {
                info!("{} watcher initialization complete", kind);
            }
            Err(e) => {
                warn!("{} watch error, retrying: {}", kind, e);
            }
        }
    }

    Err(ControllerError::Watch(format!("{kind} watch stream ended")))
}

/// Watches Orderers and their owned objects.
pub struct Watcher {
    client: Client,
    namespace: Option<String>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a watcher over `namespace`, or all namespaces when `None`
    pub fn new(client: Client, namespace: Option<String>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            client,
            namespace,
            dispatcher,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// Starts watching Orderer resources. Deletions are enqueued too; the pass
    /// then finds nothing to do.
    pub async fn watch_orderers(&self) -> Result<(), ControllerError> {
        watch_kind(
            self.api::<Orderer>(),
            watcher::Config::default(),
            self.dispatcher.clone(),
            "Orderer",
            |orderer| ObjectKey::from_resource(orderer),
        )
        .await
    }

    /// Enqueues the controlling Orderer of changed or deleted credential bundles
    pub async fn watch_secrets(&self) -> Result<(), ControllerError> {
        self.watch_owned(self.api::<Secret>(), "Secret").await
    }

    /// Enqueues the controlling Orderer of changed or deleted services
    pub async fn watch_services(&self) -> Result<(), ControllerError> {
        self.watch_owned(self.api::<Service>(), "Service").await
    }

    /// Enqueues the controlling Orderer of changed or deleted workload sets
    pub async fn watch_stateful_sets(&self) -> Result<(), ControllerError> {
        self.watch_owned(self.api::<StatefulSet>(), "StatefulSet").await
    }

    async fn watch_owned<K>(&self, api: Api<K>, kind: &'static str) -> Result<(), ControllerError>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    {
        watch_kind(
            api,
            watcher::Config::default().labels(&managed_by_selector()),
            self.dispatcher.clone(),
            kind,
            controlling_orderer,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn owner(kind: &str, api_version: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: "orderer0".to_string(),
            uid: "uid-1".to_string(),
            controller,
            ..Default::default()
        }
    }

    fn service_owned_by(owners: Vec<OwnerReference>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("orderer0".to_string()),
                namespace: Some("fabric".to_string()),
                owner_references: Some(owners),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_controlling_orderer_is_found() {
        let service = service_owned_by(vec![
            owner("Deployment", "apps/v1", Some(true)),
            owner("Orderer", "fabric.hyperledger.org/v1alpha1", Some(true)),
        ]);
        assert_eq!(
            controlling_orderer(&service),
            Some(ObjectKey::new("fabric", "orderer0"))
        );
    }

    #[test]
    fn test_non_controller_owner_is_ignored() {
        let service = service_owned_by(vec![owner("Orderer", "fabric.hyperledger.org/v1alpha1", None)]);
        assert_eq!(controlling_orderer(&service), None);
    }

    #[test]
    fn test_orderer_of_another_group_is_ignored() {
        let service = service_owned_by(vec![owner("Orderer", "example.com/v1", Some(true))]);
        assert_eq!(controlling_orderer(&service), None);
    }

    #[test]
    fn test_selector_matches_factory_label() {
        let orderer = crate::test_utils::test_orderer("fabric", "orderer0");
        let factory = crate::reconciler::factory::ResourceFactory::new(std::sync::Arc::new(
            crate::templates::TemplateRegistry::embedded(),
        ));
        let service = factory
            .build_network_endpoint(&orderer, &crate::test_utils::orderer_key())
            .unwrap();
        let labels = service.metadata.labels.unwrap();

        let selector = managed_by_selector();
        let (label, value) = selector.split_once('=').unwrap();
        assert_eq!(labels.get(label).map(String::as_str), Some(value));
    }

    #[test]
    fn test_unowned_object() {
        assert_eq!(controlling_orderer(&Service::default()), None);
    }

    #[test]
    fn test_owner_reference_from_factory_maps_back() {
        let orderer = crate::test_utils::test_orderer("fabric", "orderer0");
        let service = service_owned_by(vec![orderer.controller_owner_ref(&()).unwrap()]);
        assert_eq!(
            controlling_orderer(&service),
            Some(ObjectKey::new("fabric", "orderer0"))
        );
    }
}

//! Configuration prerequisite.
//!
//! Every orderer pod reads the shared `fabric-configuration` ConfigMap of its
//! namespace. A pass makes sure it exists before touching anything else.

use cluster_client::{ClusterClientTrait, ClusterError, ObjectKey};
use tracing::{debug, info};

use crate::error::ControllerError;
use crate::reconciler::factory::{CONFIG_MAP_NAME, ResourceFactory};

/// Creates the namespace's fabric configuration from its template when it is
/// missing. A concurrent create counts as success.
pub async fn ensure_configuration_present(
    client: &dyn ClusterClientTrait,
    factory: &ResourceFactory,
    namespace: &str,
) -> Result<(), ControllerError> {
    ensure(client, factory, namespace)
        .await
        .map_err(|source| ControllerError::Configuration {
            namespace: namespace.to_string(),
            source: Box::new(source),
        })
}

async fn ensure(
    client: &dyn ClusterClientTrait,
    factory: &ResourceFactory,
    namespace: &str,
) -> Result<(), ControllerError> {
    let key = ObjectKey::new(namespace, CONFIG_MAP_NAME);
    match client.get_config_map(&key).await {
        Ok(_) => {
            debug!(config_map = %key, "Fabric configuration present");
            return Ok(());
        }
        Err(ClusterError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let config_map = factory.build_configuration(namespace)?;
    match client.create_config_map(&config_map).await {
        Ok(_) => {
            info!(config_map = %key, "Created fabric configuration");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(config_map = %key, "Fabric configuration created concurrently");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::TemplateRegistry;
    use cluster_client::MockClusterClient;
    use cluster_client::mock::MockOperation;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn factory() -> ResourceFactory {
        ResourceFactory::new(Arc::new(TemplateRegistry::embedded()))
    }

    #[tokio::test]
    async fn test_creates_missing_configuration() {
        let cluster = MockClusterClient::new();

        ensure_configuration_present(&cluster, &factory(), "fabric")
            .await
            .unwrap();

        let created = cluster
            .config_map(&ObjectKey::new("fabric", CONFIG_MAP_NAME))
            .unwrap();
        assert!(created.data.unwrap().contains_key("ORDERER_GENERAL_GENESISMETHOD"));
        assert_eq!(cluster.creates("ConfigMap"), 1);
    }

    #[tokio::test]
    async fn test_existing_configuration_is_left_alone() {
        let cluster = MockClusterClient::new();
        cluster.add_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some(CONFIG_MAP_NAME.to_string()),
                namespace: Some("fabric".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("FABRIC_LOGGING_SPEC".to_string(), "DEBUG".to_string())])),
            ..Default::default()
        });

        ensure_configuration_present(&cluster, &factory(), "fabric")
            .await
            .unwrap();

        assert_eq!(cluster.creates("ConfigMap"), 0);
        let kept = cluster
            .config_map(&ObjectKey::new("fabric", CONFIG_MAP_NAME))
            .unwrap();
        assert_eq!(kept.data.unwrap()["FABRIC_LOGGING_SPEC"], "DEBUG");
    }

    #[tokio::test]
    async fn test_concurrent_create_is_success() {
        let cluster = MockClusterClient::new();
        cluster.lose_next_create_race(MockOperation::CreateConfigMap);

        ensure_configuration_present(&cluster, &factory(), "fabric")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let cluster = MockClusterClient::new();
        cluster.fail(MockOperation::GetConfigMap, "apiserver unavailable");

        let err = ensure_configuration_present(&cluster, &factory(), "fabric")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Configuration { ref namespace, .. } if namespace == "fabric"));
        assert_eq!(cluster.creates("ConfigMap"), 0);
    }
}

//! Shared value types

use std::fmt;

use kube::Resource;

/// Namespaced name of a Kubernetes object
///
/// This is the identifier a reconciliation pass is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object within its namespace
    pub name: String,
}

impl ObjectKey {
    /// Key for `name` in `namespace`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object in the same namespace with a different name
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }

    /// Key of a namespaced object, if it has both a name and a namespace
    pub fn from_resource<K: Resource>(resource: &K) -> Option<Self> {
        let meta = resource.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_display_is_namespace_slash_name() {
        assert_eq!(ObjectKey::new("fabric", "orderer0").to_string(), "fabric/orderer0");
    }

    #[test]
    fn test_sibling_keeps_namespace() {
        let key = ObjectKey::new("fabric", "orderer0");
        assert_eq!(key.sibling("orderer0-secret"), ObjectKey::new("fabric", "orderer0-secret"));
    }

    #[test]
    fn test_from_resource_requires_namespace() {
        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some("orderer0-secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(ObjectKey::from_resource(&secret), None);

        secret.metadata.namespace = Some("fabric".to_string());
        assert_eq!(
            ObjectKey::from_resource(&secret),
            Some(ObjectKey::new("fabric", "orderer0-secret"))
        );
    }
}

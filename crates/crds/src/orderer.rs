//! Orderer CRD
//!
//! Declares a Hyperledger Fabric ordering node: the MSP and TLS material it
//! runs with, its storage and container parameters, and the hosts it should be
//! reachable on. The status carries the access point computed once the node's
//! service has been assigned a port.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "fabric.hyperledger.org",
    version = "v1alpha1",
    kind = "Orderer",
    namespaced,
    status = "OrdererStatus",
    printcolumn = r#"{"name":"AccessPoint","type":"string","jsonPath":".status.accessPoint"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OrdererSpec {
    /// Base64-encoded admin certificates (PEM)
    #[serde(default)]
    pub admin_certs: Vec<String>,

    /// Base64-encoded CA certificates (PEM)
    #[serde(default)]
    pub ca_certs: Vec<String>,

    /// Base64-encoded private key of the signing identity
    #[serde(default)]
    pub key_store: String,

    /// Base64-encoded signing certificate (PEM); its organization becomes the MSP ID
    #[serde(default)]
    pub sign_certs: String,

    /// Base64-encoded TLS CA certificates (PEM)
    #[serde(default)]
    pub tls_cacerts: Vec<String>,

    /// TLS server material
    #[serde(default)]
    pub tls: OrdererTls,

    /// Storage class for the ledger volume (defaults to "default")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the ledger volume (defaults to "5Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,

    /// Orderer container image (defaults to hyperledger/fabric-orderer:1.4.3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Compute resources for the orderer container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,

    /// Extra environment entries passed to the orderer container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_params: Vec<ConfigParam>,

    /// Externally reachable hostnames or IPs, in order of preference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrdererTls {
    /// Base64-encoded TLS certificate (PEM)
    #[serde(default)]
    pub tls_cert: String,

    /// Base64-encoded TLS private key (PEM)
    #[serde(default)]
    pub tls_key: String,
}

/// A name/value pair appended to the orderer container's environment
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ConfigParam {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Container resource limits and requests, as quantity strings keyed by resource name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl From<&ResourceLimits> for ResourceRequirements {
    fn from(value: &ResourceLimits) -> Self {
        let quantities = |map: &BTreeMap<String, String>| {
            if map.is_empty() {
                None
            } else {
                Some(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                        .collect::<BTreeMap<_, _>>(),
                )
            }
        };
        ResourceRequirements {
            limits: quantities(&value.limits),
            requests: quantities(&value.requests),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrdererStatus {
    /// Where the orderer can be reached: `https://<host>:<port>`, or the bare
    /// port when no host is known. Empty until computed, then never changed.
    #[serde(default)]
    pub access_point: String,
}

impl Orderer {
    /// The computed access point, or an empty string when none is recorded yet
    pub fn access_point(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |status| status.access_point.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: OrdererSpec = serde_json::from_value(serde_json::json!({
            "adminCerts": ["YQ=="],
            "caCerts": ["Yg=="],
            "keyStore": "Yw==",
            "signCerts": "ZA==",
            "tlsCacerts": ["ZQ=="],
            "tls": {"tlsCert": "Zg==", "tlsKey": "Zw=="},
            "storageSize": "10Gi",
            "configParams": [{"name": "ORDERER_GENERAL_LOGLEVEL", "value": "debug"}],
            "hosts": ["orderer.example.com"]
        }))
        .unwrap();

        assert_eq!(spec.admin_certs, vec!["YQ==".to_string()]);
        assert_eq!(spec.tls.tls_key, "Zw==");
        assert_eq!(spec.storage_size.as_deref(), Some("10Gi"));
        assert_eq!(spec.storage_class, None);
        assert_eq!(spec.config_params[0].name, "ORDERER_GENERAL_LOGLEVEL");
        assert_eq!(spec.hosts, vec!["orderer.example.com".to_string()]);
    }

    #[test]
    fn test_empty_spec_is_accepted() {
        // Validation of required credentials happens at reconcile time
        let spec: OrdererSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.admin_certs.is_empty());
        assert!(spec.tls.tls_cert.is_empty());
    }

    #[test]
    fn test_resource_limits_convert_to_requirements() {
        let limits = ResourceLimits {
            limits: BTreeMap::from([("cpu".to_string(), "500m".to_string())]),
            requests: BTreeMap::new(),
        };
        let requirements = ResourceRequirements::from(&limits);
        assert_eq!(
            requirements.limits.unwrap().get("cpu"),
            Some(&Quantity("500m".to_string()))
        );
        assert!(requirements.requests.is_none());
    }

    #[test]
    fn test_access_point_defaults_to_empty() {
        let orderer = Orderer::new("orderer0", OrdererSpec::default());
        assert_eq!(orderer.access_point(), "");
    }
}

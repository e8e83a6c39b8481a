//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cluster_client::{MockClusterClient, ObjectKey};
use crds::{Orderer, OrdererSpec, OrdererTls};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::reconciler::Reconciler;
use crate::reconciler::factory::ResourceFactory;
use crate::templates::TemplateRegistry;

/// Signing certificate whose subject names organization `OrgA`
pub const SIGN_CERT_PEM: &[u8] = include_bytes!("../testdata/subject_org.pem");

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Key of the Orderer built by [`test_orderer`] with the usual names
pub fn orderer_key() -> ObjectKey {
    ObjectKey::new("fabric", "orderer0")
}

/// A spec carrying every credential field
pub fn test_orderer_spec() -> OrdererSpec {
    OrdererSpec {
        admin_certs: vec![encode(b"admin certificate")],
        ca_certs: vec![encode(b"ca certificate")],
        key_store: encode(b"orderer private key"),
        sign_certs: encode(SIGN_CERT_PEM),
        tls_cacerts: vec![encode(b"tls ca certificate")],
        tls: OrdererTls {
            tls_cert: encode(b"tls certificate"),
            tls_key: encode(b"tls private key"),
        },
        ..Default::default()
    }
}

/// Helper to create a test Orderer with a uid so it can own objects
pub fn test_orderer(namespace: &str, name: &str) -> Orderer {
    Orderer {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            ..Default::default()
        },
        spec: test_orderer_spec(),
        status: None,
    }
}

/// Reconciler over `cluster` with the embedded templates
pub fn test_reconciler(cluster: &MockClusterClient) -> Reconciler {
    Reconciler::new(
        Box::new(cluster.clone()),
        ResourceFactory::new(Arc::new(TemplateRegistry::embedded())),
    )
}

//! Fabric Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the fabric operator controllers.

pub mod orderer;

pub use orderer::*;

/// API group shared by all fabric operator resources
pub const API_GROUP: &str = "fabric.hyperledger.org";

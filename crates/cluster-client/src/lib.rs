//! Cluster API client
//!
//! Typed access to the Kubernetes objects the fabric operator reads and
//! writes. Controllers depend on [`ClusterClientTrait`] so that a
//! reconciliation pass can run against the real API server
//! ([`KubeClusterClient`]) or an in-memory store (`MockClusterClient`,
//! behind the `test-util` feature).
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient, ObjectKey};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let orderer = client.get_orderer(&ObjectKey::new("fabric", "orderer0")).await?;
//! println!("access point: {}", orderer.access_point());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
pub use models::ObjectKey;
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;

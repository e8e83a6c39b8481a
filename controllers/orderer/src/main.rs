//! Orderer Controller
//!
//! Converges Hyperledger Fabric ordering nodes declared as `Orderer` resources
//! onto Kubernetes: a credential Secret, a NodePort Service, the access point
//! in the Orderer's status, and the StatefulSet running the node.

mod access_point;
mod backoff;
mod config;
mod configuration;
mod controller;
mod dispatcher;
mod error;
mod identity;
mod probes;
mod reconciler;
mod templates;
#[cfg(test)]
mod test_utils;
mod watcher;

use config::ControllerConfig;
use controller::Controller;
use crate::error::ControllerError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls stack needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Orderer Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!(
        "  Templates: {}",
        config
            .template_dir
            .as_deref()
            .map_or_else(|| "built-in".to_string(), |dir| dir.display().to_string())
    );
    info!("  Workers: {}", config.workers);
    info!("  Max requeue delay: {}s", config.requeue_max_seconds);
    info!("  Probe port: {}", config.probe_port);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

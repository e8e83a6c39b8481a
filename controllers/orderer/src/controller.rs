//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the watchers, the
//! work queue, the reconciliation workers and the probe server together.

use std::sync::Arc;
use std::time::Instant;

use cluster_client::KubeClusterClient;
use kube::Client;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::RequeueBackoff;
use crate::config::ControllerConfig;
use crate::dispatcher::{Dispatcher, WorkQueue};
use crate::error::ControllerError;
use crate::probes::{self, Metrics, ProbeState};
use crate::reconciler::factory::ResourceFactory;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::templates::TemplateRegistry;
use crate::watcher::Watcher;

/// Reconciles keys from `queue` until it shuts down.
///
/// Finished passes reset the key's backoff; passes that asked to run again or
/// failed are enqueued again after the key's next backoff delay.
pub async fn run_worker(
    worker: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    backoff: Arc<RequeueBackoff>,
    metrics: Arc<Metrics>,
) {
    debug!(worker, "Worker started");
    while let Some(key) = queue.next_pass().await {
        let started = Instant::now();
        let outcome = match reconciler.reconcile(&key).await {
            Ok(ReconcileOutcome::Done) => {
                backoff.forget(&key);
                "done"
            }
            Ok(ReconcileOutcome::Requeue) => {
                let delay = backoff.next_delay(&key);
                debug!(key = %key, "Requeueing in {:?}", delay);
                queue.enqueue_after(key.clone(), delay);
                "requeue"
            }
            Err(e) => {
                let delay = backoff.next_delay(&key);
                error!(key = %key, "Reconciliation failed, retrying in {:?}: {}", delay, e);
                queue.enqueue_after(key.clone(), delay);
                "error"
            }
        };
        metrics.observe(outcome, started.elapsed());
        queue.done(&key);
    }
    debug!(worker, "Worker stopped");
}

/// Main controller for Orderer resources.
pub struct Controller {
    orderer_watcher: JoinHandle<Result<(), ControllerError>>,
    secret_watcher: JoinHandle<Result<(), ControllerError>>,
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    stateful_set_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
    workers: Vec<JoinHandle<()>>,
    queue: Arc<WorkQueue>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Orderer Controller");

        let kube_client = Client::try_default().await?;

        let templates = match &config.template_dir {
            Some(dir) => TemplateRegistry::from_dir(dir)?,
            None => {
                let registry = TemplateRegistry::embedded();
                registry.validate()?;
                registry
            }
        };
        let reconciler = Arc::new(Reconciler::new(
            Box::new(KubeClusterClient::new(kube_client.clone())),
            ResourceFactory::new(Arc::new(templates)),
        ));

        let metrics = Arc::new(Metrics::new()?);
        let probe_state = ProbeState::new(metrics.clone());
        let probe_server = {
            let state = probe_state.clone();
            let port = config.probe_port;
            tokio::spawn(async move { probes::serve(port, state).await })
        };

        let queue = Arc::new(WorkQueue::new());
        let backoff = Arc::new(RequeueBackoff::new(config.requeue_max_seconds));
        let dispatcher: Arc<dyn Dispatcher> = queue.clone();
        let watcher_instance = Arc::new(Watcher::new(kube_client, config.namespace.clone(), dispatcher));

        let orderer_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_orderers().await })
        };

        let secret_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_secrets().await })
        };

        let service_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_services().await })
        };

        let stateful_set_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_stateful_sets().await })
        };

        let workers = (0..config.workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    queue.clone(),
                    reconciler.clone(),
                    backoff.clone(),
                    metrics.clone(),
                ))
            })
            .collect();
        info!("Started {} reconciliation workers", config.workers);

        probe_state.set_ready();

        Ok(Self {
            orderer_watcher,
            secret_watcher,
            service_watcher,
            stateful_set_watcher,
            probe_server,
            workers,
            queue,
        })
    }

    /// Runs the controller until ctrl-c or until a watcher or the probe
    /// server stops. In-flight passes finish before this returns.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Orderer Controller running");

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                signal.map_err(ControllerError::from)
            }
            result = &mut self.orderer_watcher => exited("Orderer watcher", result),
            result = &mut self.secret_watcher => exited("Secret watcher", result),
            result = &mut self.service_watcher => exited("Service watcher", result),
            result = &mut self.stateful_set_watcher => exited("StatefulSet watcher", result),
            result = &mut self.probe_server => exited("Probe server", result),
        };

        self.queue.shutdown();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Worker panicked: {}", e);
            }
        }
        for task in [
            &self.orderer_watcher,
            &self.secret_watcher,
            &self.service_watcher,
            &self.stateful_set_watcher,
            &self.probe_server,
        ] {
            task.abort();
        }

        info!("Orderer Controller stopped");
        result
    }
}

fn exited(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Task(format!("{task} panicked: {e}")))?
        .map_err(|e| ControllerError::Task(format!("{task} stopped: {e}")))
}

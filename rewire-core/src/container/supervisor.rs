//! Background reconfiguration.
//!
//! A [`Supervisor`] owns a [`Reconciler`] and keeps calling
//! [`Reconciler::new_component_graph_with`] on a blocking worker thread.
//! Every graph it adopts is published on a `watch` channel before the
//! instances it replaces are deconstructed, so readers always see the graph
//! in service and never a half-built or half-retired one.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::{GraphUpdate, ReconfigControl, Reconciler};
use crate::deconstruct::Deconstructor;
use crate::error::ReconfigError;
use crate::graph::ComponentGraph;
use crate::resolver::FallbackResolver;

/// Failures reported when a supervisor is shut down.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("reconfiguration worker panicked: {0}")]
    Join(#[from] JoinError),

    /// The worker stopped on a failure it could not recover from.
    #[error(transparent)]
    Reconfig(#[from] ReconfigError),
}

type WorkerOutput = (Reconciler, Result<(), ReconfigError>);

/// Runs reconfigurations in the background and publishes the graph in
/// service.
///
/// After a graph has been adopted, retryable failures keep it in service and
/// the worker waits for the next delivery. The worker stops when the pull is
/// cancelled, on a protocol violation, or on any failure before the first
/// graph.
pub struct Supervisor {
    current: watch::Receiver<Arc<ComponentGraph>>,
    control: ReconfigControl,
    worker: JoinHandle<WorkerOutput>,
}

impl Supervisor {
    /// Start the worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn(reconciler: Reconciler, fallback: Arc<dyn FallbackResolver>) -> Self {
        let (publish, current) = watch::channel(Arc::new(ComponentGraph::default()));
        let control = reconciler.control();
        let worker = tokio::task::spawn_blocking(move || run(reconciler, fallback, publish));

        Self {
            current,
            control,
            worker,
        }
    }

    /// The graph in service. Empty until the first graph is adopted.
    pub fn current(&self) -> Arc<ComponentGraph> {
        Arc::clone(&self.current.borrow())
    }

    /// Subscribe to graph changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ComponentGraph>> {
        self.current.clone()
    }

    pub fn control(&self) -> ReconfigControl {
        self.control.clone()
    }

    /// Whether the worker has stopped.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Cancel the worker, wait for it to stop, then deconstruct the graph in
    /// service.
    ///
    /// Returns the failure that stopped the worker, if there was one.
    pub async fn shutdown(self, deconstructor: &dyn Deconstructor) -> Result<(), SupervisorError> {
        self.control.cancel();
        let (reconciler, outcome) = self.worker.await?;

        let graph = self.current.borrow().clone();
        reconciler.shutdown(&graph, deconstructor);
        outcome.map_err(SupervisorError::from)
    }
}

fn run(
    mut reconciler: Reconciler,
    fallback: Arc<dyn FallbackResolver>,
    publish: watch::Sender<Arc<ComponentGraph>>,
) -> WorkerOutput {
    let restart_on_redeploy = reconciler.settings().restart_on_redeploy;
    let mut adopted = false;

    let outcome = loop {
        let current = publish.borrow().clone();
        // Retired instances are deconstructed only after the new graph is
        // published.
        let update = reconciler.new_component_graph_with(&current, fallback.as_ref(), restart_on_redeploy, |graph| {
            debug!(generation = graph.generation(), "publishing component graph");
            publish.send_replace(Arc::new(graph));
        });
        match update {
            Ok(GraphUpdate::Applied(())) => {
                adopted = true;
            }
            Ok(GraphUpdate::Cancelled) => {
                info!("reconfiguration worker cancelled");
                break Ok(());
            }
            Err(err) if adopted && err.is_retryable() => {
                warn!(
                    generation = current.generation(),
                    error = %err,
                    "keeping current component graph"
                );
            }
            Err(err) => {
                warn!(error = %err, "reconfiguration worker stopped");
                break Err(err);
            }
        }
    };

    (reconciler, outcome)
}

//! Async request handle for a simulated cluster
//!
//! Requests are queued on a channel and executed one at a time by a single
//! task, so callers sharing a handle never race each other. Writers using
//! other handles on the same store are still caught by the coordinator's
//! compare-and-swap.
//!
//! Store access blocks (file I/O, waiting on a lock held by another process),
//! so each request runs on tokio's blocking pool while the service task
//! awaits it.

use crate::coordinator::{Response, VotingCoordinator};
use crate::state::ClusterState;
use crate::{ClusterError, Result};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tracing::{debug, error, info};

/// Requests sent to the service task
enum ServiceCommand {
    Initialize {
        response: oneshot::Sender<Result<Response>>,
    },

    Vote {
        voter_id: String,
        candidate: String,
        response: oneshot::Sender<Result<Response>>,
    },

    AddCandidate {
        name: String,
        response: oneshot::Sender<Result<Response>>,
    },

    FailNode {
        node_id: String,
        response: oneshot::Sender<Result<Response>>,
    },

    RecoverNode {
        node_id: String,
        response: oneshot::Sender<Result<Response>>,
    },

    State {
        response: oneshot::Sender<Result<Option<ClusterState>>>,
    },

    /// Stop the service task
    Shutdown,
}

/// Handle to a running cluster service
#[derive(Clone)]
pub struct ClusterService {
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
}

impl ClusterService {
    /// Spawn the service task on the current tokio runtime
    pub fn spawn(coordinator: VotingCoordinator) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_service(Arc::new(coordinator), command_rx));
        Self { command_tx }
    }

    pub async fn initialize(&self) -> Result<Response> {
        self.request(|response| ServiceCommand::Initialize { response })
            .await
    }

    pub async fn vote(&self, voter_id: impl Into<String>, candidate: impl Into<String>) -> Result<Response> {
        let (voter_id, candidate) = (voter_id.into(), candidate.into());
        self.request(|response| ServiceCommand::Vote {
            voter_id,
            candidate,
            response,
        })
        .await
    }

    pub async fn add_candidate(&self, name: impl Into<String>) -> Result<Response> {
        let name = name.into();
        self.request(|response| ServiceCommand::AddCandidate { name, response })
            .await
    }

    pub async fn fail_node(&self, node_id: impl Into<String>) -> Result<Response> {
        let node_id = node_id.into();
        self.request(|response| ServiceCommand::FailNode { node_id, response })
            .await
    }

    pub async fn recover_node(&self, node_id: impl Into<String>) -> Result<Response> {
        let node_id = node_id.into();
        self.request(|response| ServiceCommand::RecoverNode { node_id, response })
            .await
    }

    pub async fn state(&self) -> Result<Option<ClusterState>> {
        self.request(|response| ServiceCommand::State { response })
            .await
    }

    /// Stop the service. Requests already queued are still answered.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ServiceCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> ServiceCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(command(tx))
            .map_err(|_| ClusterError::ShuttingDown)?;

        rx.await.map_err(|_| ClusterError::ShuttingDown)?
    }
}

/// Main service loop
async fn run_service(
    coordinator: Arc<VotingCoordinator>,
    mut command_rx: mpsc::UnboundedReceiver<ServiceCommand>,
) {
    info!(
        cluster_size = coordinator.config().cluster_size,
        "cluster service started"
    );

    while let Some(command) = command_rx.recv().await {
        match command {
            ServiceCommand::Initialize { response } => {
                let result = blocking(&coordinator, |c| c.initialize()).await;
                let _ = response.send(result);
            }

            ServiceCommand::Vote {
                voter_id,
                candidate,
                response,
            } => {
                debug!(%voter_id, %candidate, "vote request");
                let result = blocking(&coordinator, move |c| c.vote(&voter_id, &candidate)).await;
                let _ = response.send(result);
            }

            ServiceCommand::AddCandidate { name, response } => {
                let result = blocking(&coordinator, move |c| c.add_candidate(&name)).await;
                let _ = response.send(result);
            }

            ServiceCommand::FailNode { node_id, response } => {
                let result = blocking(&coordinator, move |c| c.fail_node(&node_id)).await;
                let _ = response.send(result);
            }

            ServiceCommand::RecoverNode { node_id, response } => {
                let result = blocking(&coordinator, move |c| c.recover_node(&node_id)).await;
                let _ = response.send(result);
            }

            ServiceCommand::State { response } => {
                let result = blocking(&coordinator, |c| c.state()).await;
                let _ = response.send(result);
            }

            ServiceCommand::Shutdown => {
                info!("cluster service shutting down");
                break;
            }
        }
    }
}

/// Run one coordinator call on the blocking pool
async fn blocking<T, F>(coordinator: &Arc<VotingCoordinator>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&VotingCoordinator) -> Result<T> + Send + 'static,
{
    let coordinator = Arc::clone(coordinator);
    match task::spawn_blocking(move || f(&coordinator)).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "cluster request panicked");
            Err(ClusterError::ServiceFailed(e.to_string()))
        }
    }
}

use crate::dispatch::WorkerClient;
use crate::edge_map::EdgeMap;
use crate::registry::NodeRegistry;
use crate::status::StatusSender;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wirecore::{Id, VarStore};

/// Everything a node can see during a run. Created once per top-level flow
/// invocation and cloned cheaply into every node execution.
#[derive(Clone)]
pub struct RunContext {
    pub flow_run_id: Id,
    pub vars: VarStore,
    pub edges: Arc<EdgeMap>,
    pub registry: Arc<NodeRegistry>,
    pub status: StatusSender,
    pub cancel: CancellationToken,
    /// Deadline for a single node invocation.
    pub node_timeout: Option<Duration>,
    /// Present on the coordinator: remote-marked nodes are dispatched here.
    pub worker: Option<Arc<dyn WorkerClient>>,
}

impl RunContext {
    pub fn new(
        flow_run_id: Id,
        vars: VarStore,
        edges: Arc<EdgeMap>,
        registry: Arc<NodeRegistry>,
        status: StatusSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            flow_run_id,
            vars,
            edges,
            registry,
            status,
            cancel,
            node_timeout: None,
            worker: None,
        }
    }

    pub fn with_node_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn with_worker(mut self, worker: Option<Arc<dyn WorkerClient>>) -> Self {
        self.worker = worker;
        self
    }
}

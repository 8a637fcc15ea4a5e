use crate::dispatch::{RemoteOutcome, WorkerClient};
use crate::edge_map::EdgeMap;
use crate::graph::FlowGraph;
use crate::registry::{ExecutorFactory, NodeRegistry};
use crate::runner::FlowRunner;
use crate::status::{pump_status, NullSubscriber, RecordSubscriber, StatusSender};
use crate::RunContext;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wirecore::{FlowError, Id, Journal, Node, NodeError, Value, VarStore};

/// Executes dispatched work on a worker process. Holds the worker's copy of
/// the flow graph; runs use the same runner as the coordinator, differing
/// only in the termination predicate.
pub struct WorkerExecutor {
    factory: Arc<dyn ExecutorFactory>,
    journal: Journal,
    graph: FlowGraph,
}

impl WorkerExecutor {
    pub fn new(factory: Arc<dyn ExecutorFactory>, journal: Journal, graph: FlowGraph) -> Self {
        Self {
            factory,
            journal,
            graph,
        }
    }

    /// Single-node run: execute the supplied node against the supplied
    /// variables and hand back the continuation plus everything written.
    pub async fn run_single(
        &self,
        node: &Node,
        vars_snapshot: BTreeMap<String, Value>,
    ) -> Result<RemoteOutcome, NodeError> {
        debug!(node = %node.name, "worker single-node run");
        let vars = VarStore::from_snapshot(vars_snapshot);
        vars.start_tracking().await;

        let result = self
            .execute(Some(node), node.id, None, true, vars.clone(), Arc::new(NullSubscriber))
            .await;

        match result {
            Ok(next) => Ok(RemoteOutcome {
                next,
                delta: vars.take_delta().await,
            }),
            Err(FlowError::Node { source, .. }) => Err(source),
            Err(FlowError::Canceled) => Err(NodeError::Canceled),
            Err(e) => Err(NodeError::Internal(e.to_string())),
        }
    }

    /// Multi-node run: walk from `start` until the next node is `stop` or
    /// the branch ends, streaming records to the subscriber as they are
    /// emitted.
    pub async fn run_multi(
        &self,
        start: Id,
        stop: Option<Id>,
        vars_snapshot: BTreeMap<String, Value>,
        subscriber: Arc<dyn RecordSubscriber>,
    ) -> Result<RemoteOutcome, FlowError> {
        debug!(%start, ?stop, "worker multi-node run");
        let vars = VarStore::from_snapshot(vars_snapshot);
        vars.start_tracking().await;

        let next = self
            .execute(None, start, stop, false, vars.clone(), subscriber)
            .await?;

        Ok(RemoteOutcome {
            next,
            delta: vars.take_delta().await,
        })
    }

    async fn execute(
        &self,
        override_node: Option<&Node>,
        start: Id,
        stop: Option<Id>,
        single_step: bool,
        vars: VarStore,
        subscriber: Arc<dyn RecordSubscriber>,
    ) -> Result<Option<Id>, FlowError> {
        let edges = Arc::new(EdgeMap::build(&self.graph.edges));

        // the dispatched node body wins over the worker's stored copy
        let mut nodes = self.graph.nodes.clone();
        if let Some(node) = override_node {
            match nodes.iter_mut().find(|n| n.id == node.id) {
                Some(slot) => *slot = node.clone(),
                None => nodes.push(node.clone()),
            }
        }
        let registry = Arc::new(
            NodeRegistry::build(self.factory.as_ref(), &nodes)
                .map_err(|e| FlowError::node("registry", e))?,
        );

        let cancel = CancellationToken::new();
        let (status, rx) = StatusSender::channel();
        let pump = tokio::spawn(pump_status(
            rx,
            self.journal.clone(),
            subscriber,
            cancel.clone(),
        ));

        let ctx = RunContext::new(Id::now(), vars, edges, registry, status, cancel.clone());
        let runner = FlowRunner::new();
        let result = if single_step {
            runner.step(start, &ctx).await
        } else {
            runner.run_until(start, stop, &ctx).await
        };

        if result.is_err() {
            cancel.cancel();
        }
        drop(ctx);
        let _ = pump.await;
        result
    }
}

/// A worker client that executes in-process. Stands in for the streaming
/// RPC transport in tests and single-machine deployments.
pub struct InProcessWorker {
    executor: WorkerExecutor,
}

impl InProcessWorker {
    pub fn new(executor: WorkerExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl WorkerClient for InProcessWorker {
    async fn run_node(
        &self,
        node: &Node,
        vars: BTreeMap<String, Value>,
    ) -> Result<RemoteOutcome, NodeError> {
        self.executor.run_single(node, vars).await
    }
}

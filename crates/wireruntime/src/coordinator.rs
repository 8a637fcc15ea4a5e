use crate::dispatch::WorkerClient;
use crate::edge_map::EdgeMap;
use crate::graph::FlowGraph;
use crate::registry::{ExecutorFactory, NodeRegistry};
use crate::runner::FlowRunner;
use crate::status::{pump_status, RecordSubscriber, StatusSender};
use crate::RunContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wirecore::{FlowError, Id, Journal, VarStore};

/// Per-run knobs handed to the coordinator.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Deadline for a single node invocation.
    pub node_timeout: Option<Duration>,
    /// Deadline for the whole run.
    pub flow_timeout: Option<Duration>,
    /// Remote-marked nodes are dispatched here when present.
    pub worker: Option<Arc<dyn WorkerClient>>,
    /// External cancel handle; a fresh token when not supplied.
    pub cancel: CancellationToken,
}

/// Drives a flow run: builds the runtime graph, spawns the runner with a
/// status channel, and lets the status proxy persist and forward every
/// record. Remote-marked nodes are offloaded through the worker client.
pub struct Coordinator {
    factory: Arc<dyn ExecutorFactory>,
    journal: Journal,
}

impl Coordinator {
    pub fn new(factory: Arc<dyn ExecutorFactory>, journal: Journal) -> Self {
        Self { factory, journal }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Run a whole flow from its start node.
    pub async fn run_flow(
        &self,
        graph: &FlowGraph,
        vars: VarStore,
        subscriber: Arc<dyn RecordSubscriber>,
        opts: RunOptions,
    ) -> Result<(), FlowError> {
        graph.validate()?;
        let start = graph.start_node()?.id;
        info!(run = "flow", nodes = graph.nodes.len(), "starting flow run");
        self.execute(graph, start, None, false, vars, subscriber, opts)
            .await
    }

    /// Run a single node in isolation.
    pub async fn run_node(
        &self,
        graph: &FlowGraph,
        node_id: Id,
        vars: VarStore,
        subscriber: Arc<dyn RecordSubscriber>,
        opts: RunOptions,
    ) -> Result<(), FlowError> {
        self.execute(graph, node_id, None, true, vars, subscriber, opts)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        graph: &FlowGraph,
        start: Id,
        stop: Option<Id>,
        single_step: bool,
        vars: VarStore,
        subscriber: Arc<dyn RecordSubscriber>,
        opts: RunOptions,
    ) -> Result<(), FlowError> {
        let edges = Arc::new(EdgeMap::build(&graph.edges));
        let registry = Arc::new(
            NodeRegistry::build(self.factory.as_ref(), &graph.nodes)
                .map_err(|e| FlowError::node("registry", e))?,
        );
        let cancel = opts.cancel.clone();
        // runs observe a child token, so the flow deadline cancels the run
        // without touching the caller's handle
        let run_cancel = cancel.child_token();
        let (status, rx) = StatusSender::channel();
        let pump = tokio::spawn(pump_status(
            rx,
            self.journal.clone(),
            subscriber,
            run_cancel.clone(),
        ));

        let ctx = RunContext::new(Id::now(), vars, edges, registry, status, run_cancel.clone())
            .with_node_timeout(opts.node_timeout)
            .with_worker(opts.worker.clone());

        // the flow deadline cancels rather than drops the run: the in-flight
        // node settles its RUNNING record with a terminal on the way out
        let timer = opts.flow_timeout.map(|after| {
            let deadline_cancel = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                deadline_cancel.cancel();
            })
        });

        let runner = FlowRunner::new();
        let result = if single_step {
            runner.step(start, &ctx).await.map(|_| ())
        } else {
            runner.run_until(start, stop, &ctx).await.map(|_| ())
        };

        let timed_out = timer.as_ref().is_some_and(|t| t.is_finished());
        if let Some(timer) = timer {
            timer.abort();
        }
        let result = match result {
            Err(FlowError::Canceled) if timed_out && !cancel.is_cancelled() => {
                Err(FlowError::Timeout)
            }
            other => other,
        };

        if result.is_err() {
            // unwind any in-flight children, including remote ones
            run_cancel.cancel();
        }

        // dropping the context closes the status channel; the pump drains
        // whatever is left and exits
        drop(ctx);
        let _ = pump.await;

        result
    }
}

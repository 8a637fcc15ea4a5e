use crate::dispatch::WorkerClient;
use crate::registry::{run_detached, Continuation, NodeExecutor, NodeResult};
use crate::RunContext;
use std::sync::Arc;
use tracing::{debug, info};
use wirecore::{ExecutionRecord, ExecutionTarget, FlowError, Handle, Id, Node, NodeError, Value};

/// The flow interpreter: walks the graph node by node, emitting a
/// RUNNING/terminal record pair per invocation and resolving the next node
/// from the executor's decision or the default outgoing edge.
///
/// Termination is explicit: the walk ends when no next node resolves, never
/// by cycle detection. Loop nodes re-enter the runner for their bodies.
#[derive(Clone, Copy, Default)]
pub struct FlowRunner;

impl FlowRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, start: Id, ctx: &RunContext) -> Result<(), FlowError> {
        self.run_until(start, None, ctx).await.map(|_| ())
    }

    /// Walk from `start`, halting before `stop` when given. Returns the node
    /// the walk halted at, or `None` when the branch ended on its own. The
    /// worker's multi-node entry point uses the stop predicate.
    pub async fn run_until(
        &self,
        start: Id,
        stop: Option<Id>,
        ctx: &RunContext,
    ) -> Result<Option<Id>, FlowError> {
        let mut current = Some(start);
        while let Some(node_id) = current {
            if stop == Some(node_id) {
                return Ok(Some(node_id));
            }
            current = self.step(node_id, ctx).await?;
        }
        Ok(None)
    }

    /// Execute a single node and resolve its continuation. The worker's
    /// single-node entry point calls this directly.
    pub async fn step(&self, node_id: Id, ctx: &RunContext) -> Result<Option<Id>, FlowError> {
        let executor = ctx
            .registry
            .get(node_id)
            .map_err(|e| FlowError::node(node_id.to_string(), e))?;
        let node = executor.node().clone();

        if node.target == ExecutionTarget::Remote {
            if let Some(worker) = ctx.worker.clone() {
                return self.step_remote(&node, worker, ctx).await;
            }
        }

        if executor.emits_own_records() {
            return self.step_self_recording(&node, executor, ctx).await;
        }

        let snapshot = Value::Object(ctx.vars.snapshot().await).to_json();
        let running = ExecutionRecord::running(node.id, ctx.flow_run_id, &node.name)
            .with_input_snapshot(snapshot);
        ctx.status
            .send(running.clone())
            .await
            .map_err(|_| FlowError::Canceled)?;
        debug!(node = %node.name, kind = node.kind.label(), "node started");

        match self.invoke(executor, ctx).await {
            Ok(result) => {
                ctx.status
                    .send(running.succeed(result.output_data.clone()))
                    .await
                    .map_err(|_| FlowError::Canceled)?;
                if !result.outputs.is_empty() {
                    ctx.vars.merge_node(&node.name, result.outputs).await;
                }
                Ok(self.resolve_next(&node, result.next, ctx))
            }
            Err(NodeError::Canceled) => {
                let _ = ctx.status.send(running.cancel()).await;
                Err(FlowError::Canceled)
            }
            Err(e) => {
                info!(node = %node.name, error = %e, "node failed");
                ctx.status
                    .send(running.fail(e.to_string()))
                    .await
                    .map_err(|_| FlowError::Canceled)?;
                Err(FlowError::node(&node.name, e))
            }
        }
    }

    /// Loop nodes journal their own per-iteration pairs; the runner only
    /// routes their continuation and propagates their errors.
    async fn step_self_recording(
        &self,
        node: &Node,
        executor: Arc<dyn NodeExecutor>,
        ctx: &RunContext,
    ) -> Result<Option<Id>, FlowError> {
        match executor.run(ctx).await {
            Ok(result) => {
                if !result.outputs.is_empty() {
                    ctx.vars.merge_node(&node.name, result.outputs).await;
                }
                Ok(self.resolve_next(node, result.next, ctx))
            }
            Err(NodeError::Canceled) => Err(FlowError::Canceled),
            Err(e) => Err(FlowError::node(&node.name, e)),
        }
    }

    async fn step_remote(
        &self,
        node: &Node,
        worker: Arc<dyn WorkerClient>,
        ctx: &RunContext,
    ) -> Result<Option<Id>, FlowError> {
        let snapshot = ctx.vars.snapshot().await;
        let running = ExecutionRecord::running(node.id, ctx.flow_run_id, &node.name)
            .with_input_snapshot(Value::Object(snapshot.clone()).to_json());
        ctx.status
            .send(running.clone())
            .await
            .map_err(|_| FlowError::Canceled)?;
        debug!(node = %node.name, "dispatching to worker");
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(NodeError::Canceled),
            res = worker.run_node(node, snapshot) => res,
        };

        match outcome {
            Ok(remote) => {
                ctx.vars.merge_delta(remote.delta).await;
                ctx.status
                    .send(running.succeed(serde_json::Value::Null))
                    .await
                    .map_err(|_| FlowError::Canceled)?;
                Ok(remote.next)
            }
            Err(NodeError::Canceled) => {
                let _ = ctx.status.send(running.cancel()).await;
                Err(FlowError::Canceled)
            }
            Err(e) => {
                ctx.status
                    .send(running.fail(e.to_string()))
                    .await
                    .map_err(|_| FlowError::Canceled)?;
                Err(FlowError::node(&node.name, e))
            }
        }
    }

    /// The executor's explicit continuation wins; `Default` follows the
    /// default outgoing edge. No edge means this branch is done.
    fn resolve_next(&self, node: &Node, next: Continuation, ctx: &RunContext) -> Option<Id> {
        match next {
            Continuation::Goto(id) => Some(id),
            Continuation::Stop => None,
            Continuation::Default => ctx.edges.first(node.id, Handle::Unspecified),
        }
    }

    /// Await the executor's single result subject to the node deadline and
    /// the run's cancel token. Executors observe the token themselves and
    /// unwind once their in-flight suspension point returns.
    async fn invoke(
        &self,
        executor: Arc<dyn NodeExecutor>,
        ctx: &RunContext,
    ) -> Result<NodeResult, NodeError> {
        let mut rx = run_detached(executor, ctx.clone());
        let deadline = async {
            match ctx.node_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(NodeError::Canceled),
            _ = deadline => Err(NodeError::Timeout),
            res = &mut rx => res.unwrap_or_else(|_| {
                Err(NodeError::Internal("executor dropped its result channel".into()))
            }),
        }
    }
}

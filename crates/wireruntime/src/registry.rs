use crate::RunContext;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use wirecore::{Id, Node, NodeError, Value};

/// Where the run goes after a node completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Follow the node's default outgoing edge, if any.
    #[default]
    Default,
    /// Jump to a specific node. Branching nodes resolve their own edge.
    Goto(Id),
    /// End this branch of the run even if outgoing edges exist.
    Stop,
}

/// Outcome of one node invocation.
#[derive(Debug, Default)]
pub struct NodeResult {
    pub next: Continuation,
    /// Variables to publish under the node's name.
    pub outputs: BTreeMap<String, Value>,
    /// Payload stored on the SUCCESS record.
    pub output_data: serde_json::Value,
}

impl NodeResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `Some` jumps to the node, `None` ends the branch.
    pub fn with_next(mut self, next: Option<Id>) -> Self {
        self.next = match next {
            Some(id) => Continuation::Goto(id),
            None => Continuation::Stop,
        };
        self
    }

    pub fn with_output(mut self, field: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(field.into(), value);
        self
    }

    pub fn with_outputs(mut self, outputs: BTreeMap<String, Value>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_output_data(mut self, data: serde_json::Value) -> Self {
        self.output_data = data;
        self
    }
}

/// An executable node instance bound to its model.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn node(&self) -> &Node;

    /// Execute inline. Implementations must honor `ctx.cancel` at every
    /// suspension point.
    async fn run(&self, ctx: &RunContext) -> Result<NodeResult, NodeError>;

    /// Whether this executor journals its own records. Loop nodes emit one
    /// RUNNING/terminal pair per iteration instead of a single outer pair.
    fn emits_own_records(&self) -> bool {
        false
    }
}

/// Async invocation: the executor writes a single result to the returned
/// channel; the runner awaits it subject to deadline and cancellation.
pub fn run_detached(
    executor: Arc<dyn NodeExecutor>,
    ctx: RunContext,
) -> oneshot::Receiver<Result<NodeResult, NodeError>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = executor.run(&ctx).await;
        let _ = tx.send(result);
    });
    rx
}

/// Builds executor instances from persisted node models.
pub trait ExecutorFactory: Send + Sync {
    fn build(&self, node: &Node) -> Result<Arc<dyn NodeExecutor>, NodeError>;
}

/// Resolved executor instances for one run, keyed by node id.
#[derive(Default)]
pub struct NodeRegistry {
    executors: HashMap<Id, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn build(factory: &dyn ExecutorFactory, nodes: &[Node]) -> Result<Self, NodeError> {
        let mut executors = HashMap::with_capacity(nodes.len());
        for node in nodes {
            executors.insert(node.id, factory.build(node)?);
        }
        Ok(Self { executors })
    }

    pub fn get(&self, id: Id) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        self.executors
            .get(&id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("node {}", id)))
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

use async_trait::async_trait;
use std::collections::BTreeMap;
use wirecore::{Id, Node, NodeError, Value};

/// What a worker hands back after executing one dispatched node.
#[derive(Debug, Clone, Default)]
pub struct RemoteOutcome {
    pub next: Option<Id>,
    /// Variables the node wrote on the worker, namespaced by node name.
    pub delta: BTreeMap<String, Value>,
}

/// Client side of the master/worker dispatch protocol.
///
/// The coordinator sends `{node, vars_snapshot}` and awaits
/// `{next_node_id, vars_delta}`. Transport and serialization failures both
/// surface as `NodeError::Transport`; the coordinator never retries.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn run_node(
        &self,
        node: &Node,
        vars: BTreeMap<String, Value>,
    ) -> Result<RemoteOutcome, NodeError>;
}

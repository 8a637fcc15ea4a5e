use async_trait::async_trait;
use wirecore::{Node, NodeError};
use wireruntime::{NodeExecutor, NodeResult, RunContext};

/// Structural marker node. Publishes nothing and follows the default edge;
/// the start node of every flow is one of these.
pub struct NoOpExecutor {
    node: Node,
}

impl NoOpExecutor {
    pub fn new(node: Node) -> Self {
        Self { node }
    }
}

#[async_trait]
impl NodeExecutor for NoOpExecutor {
    fn node(&self) -> &Node {
        &self.node
    }

    async fn run(&self, _ctx: &RunContext) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::empty())
    }
}

use async_trait::async_trait;
use serde_json::json;
use wirecore::{expr, ConditionSpec, Handle, Node, NodeError};
use wireruntime::{NodeExecutor, NodeResult, RunContext};

/// Branching node: evaluates its comparison and selects the `then` or
/// `else` handle. A missing edge on the selected handle ends the branch.
pub struct ConditionExecutor {
    node: Node,
    spec: ConditionSpec,
}

impl ConditionExecutor {
    pub fn new(node: Node, spec: ConditionSpec) -> Self {
        Self { node, spec }
    }
}

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn node(&self) -> &Node {
        &self.node
    }

    async fn run(&self, ctx: &RunContext) -> Result<NodeResult, NodeError> {
        let cmp = &self.spec.comparison;
        let snapshot = ctx.vars.snapshot().await;

        // a `*` pattern against a plain path is an HTTP status glob
        let truthy = if cmp.expression.is_empty() && !cmp.path.is_empty() && cmp.value.contains('*')
        {
            let status = expr::evaluate(&cmp.path, &snapshot).map_err(|e| {
                NodeError::Evaluation(format!("evaluate condition expression: {e}"))
            })?;
            expr::match_status(&cmp.value, &status.render())
        } else {
            let expression = expr::normalize(cmp).map_err(|e| {
                NodeError::Evaluation(format!("normalize condition expression: {e}"))
            })?;
            expr::evaluate(&expression, &snapshot)
                .map_err(|e| NodeError::Evaluation(format!("evaluate condition expression: {e}")))?
                .is_truthy()
        };

        let handle = if truthy { Handle::Then } else { Handle::Else };
        let target = ctx.edges.first(self.node.id, handle);
        Ok(NodeResult::empty()
            .with_next(target)
            .with_output_data(json!({ "result": truthy })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use wirecore::{Comparison, Edge, Id, NodeKind, VarStore};
    use wireruntime::{Continuation, EdgeMap, NodeRegistry, StatusSender};

    fn context_with_edges(edges: Vec<Edge>) -> RunContext {
        let (status, _rx) = StatusSender::channel();
        RunContext::new(
            Id::now(),
            VarStore::new(),
            Arc::new(EdgeMap::build(&edges)),
            Arc::new(NodeRegistry::default()),
            status,
            CancellationToken::new(),
        )
    }

    fn condition_node(expression: &str) -> (Node, ConditionSpec) {
        let spec = ConditionSpec {
            comparison: Comparison {
                expression: expression.to_string(),
                ..Default::default()
            },
        };
        let node = Node::new(
            Id::now(),
            "if",
            NodeKind::Condition(spec.clone()),
        );
        (node, spec)
    }

    #[tokio::test]
    async fn true_expression_selects_then_handle() {
        let (node, spec) = condition_node("1 == 1");
        let flow_id = node.flow_id;
        let then_target = Id::now();
        let else_target = Id::now();
        let edges = vec![
            Edge::new(flow_id, node.id, then_target, Handle::Then),
            Edge::new(flow_id, node.id, else_target, Handle::Else),
        ];
        let ctx = context_with_edges(edges);

        let result = ConditionExecutor::new(node, spec).run(&ctx).await.unwrap();
        assert_eq!(result.next, Continuation::Goto(then_target));
    }

    #[tokio::test]
    async fn false_expression_selects_else_handle() {
        let (node, spec) = condition_node("1 == 2");
        let flow_id = node.flow_id;
        let else_target = Id::now();
        let edges = vec![Edge::new(flow_id, node.id, else_target, Handle::Else)];
        let ctx = context_with_edges(edges);

        let result = ConditionExecutor::new(node, spec).run(&ctx).await.unwrap();
        assert_eq!(result.next, Continuation::Goto(else_target));
    }

    #[tokio::test]
    async fn missing_edge_on_selected_handle_stops_the_branch() {
        let (node, spec) = condition_node("1 == 1");
        let ctx = context_with_edges(vec![]);

        let result = ConditionExecutor::new(node, spec).run(&ctx).await.unwrap();
        assert_eq!(result.next, Continuation::Stop);
    }

    #[tokio::test]
    async fn status_glob_value_matches_response_status() {
        let spec = ConditionSpec {
            comparison: Comparison {
                path: "A.response.status".to_string(),
                value: "4**".to_string(),
                ..Default::default()
            },
        };
        let node = Node::new(Id::now(), "if", NodeKind::Condition(spec.clone()));
        let then_target = Id::now();
        let edges = vec![Edge::new(node.flow_id, node.id, then_target, Handle::Then)];

        let (status, _rx) = StatusSender::channel();
        let vars = VarStore::new();
        let mut response = std::collections::BTreeMap::new();
        response.insert("status".to_string(), wirecore::Value::Number(404.0));
        vars.write("A", "response", wirecore::Value::Object(response)).await;
        let ctx = RunContext::new(
            Id::now(),
            vars,
            Arc::new(EdgeMap::build(&edges)),
            Arc::new(NodeRegistry::default()),
            status,
            CancellationToken::new(),
        );

        let result = ConditionExecutor::new(node, spec).run(&ctx).await.unwrap();
        assert_eq!(result.next, Continuation::Goto(then_target));
    }

    #[tokio::test]
    async fn invalid_expression_reports_evaluate_prefix() {
        let (node, spec) = condition_node("this is not valid expr");
        let ctx = context_with_edges(vec![]);

        let err = ConditionExecutor::new(node, spec)
            .run(&ctx)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("evaluate condition expression")
                || msg.contains("normalize condition expression"),
            "unexpected message: {msg}"
        );
    }

    #[tokio::test]
    async fn empty_comparison_reports_normalize_prefix() {
        let spec = ConditionSpec::default();
        let node = Node::new(Id::now(), "if", NodeKind::Condition(spec.clone()));
        let ctx = context_with_edges(vec![]);

        let err = ConditionExecutor::new(node, spec)
            .run(&ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("normalize condition expression"));
    }
}

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use wirecore::{
    expr, Comparison, ErrorPolicy, ExecutionRecord, ExprError, FlowError, ForEachSpec, ForSpec,
    Handle, Id, Node, NodeError, Value,
};
use wireruntime::{FlowRunner, NodeExecutor, NodeResult, RunContext};

/// One planned pass over the loop body.
struct Iteration {
    ordinal: i64,
    name: String,
    vars: BTreeMap<String, Value>,
    success_data: serde_json::Value,
    /// Failure locator merged into the "Error Summary" payload.
    summary: serde_json::Value,
}

/// Counted loop. Re-enters the runner for the `loop` handle's sub-graph
/// once per count, journaling one record pair per iteration.
pub struct ForExecutor {
    node: Node,
    spec: ForSpec,
}

impl ForExecutor {
    pub fn new(node: Node, spec: ForSpec) -> Self {
        Self { node, spec }
    }
}

#[async_trait]
impl NodeExecutor for ForExecutor {
    fn node(&self) -> &Node {
        &self.node
    }

    fn emits_own_records(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &RunContext) -> Result<NodeResult, NodeError> {
        let total = self.spec.iter_count.max(0);
        let iterations = (0..total)
            .map(|i| Iteration {
                ordinal: i,
                name: format!("Iteration {i}"),
                vars: BTreeMap::from([
                    ("index".to_string(), Value::Number(i as f64)),
                    ("totalItems".to_string(), Value::Number(total as f64)),
                ]),
                success_data: json!({ "index": i, "completed": true }),
                summary: json!({ "failedAtIndex": i }),
            })
            .collect();
        drive(
            &self.node,
            &self.spec.condition,
            self.spec.error_policy,
            iterations,
            ctx,
        )
        .await
    }
}

/// Collection loop. Resolves `iter_expression` to an ordered sequence or,
/// failing the type check, a keyed mapping; iterates the body once per
/// entry.
pub struct ForEachExecutor {
    node: Node,
    spec: ForEachSpec,
}

impl ForEachExecutor {
    pub fn new(node: Node, spec: ForEachSpec) -> Self {
        Self { node, spec }
    }

    async fn plan(&self, ctx: &RunContext) -> Result<Vec<Iteration>, NodeError> {
        let snapshot = ctx.vars.snapshot().await;
        match expr::eval_array(&self.spec.iter_expression, &snapshot) {
            Ok(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, value)| {
                    let i = i as i64;
                    let value_json = value.to_json();
                    Iteration {
                        ordinal: i,
                        name: format!("Iteration {i}"),
                        vars: BTreeMap::from([
                            ("index".to_string(), Value::Number(i as f64)),
                            ("value".to_string(), value),
                        ]),
                        success_data: json!({
                            "index": i,
                            "value": value_json,
                            "completed": true,
                        }),
                        summary: json!({ "failedAtIndex": i }),
                    }
                })
                .collect()),
            Err(ExprError::TypeMismatch { .. }) => {
                let entries = expr::eval_map(&self.spec.iter_expression, &snapshot)?;
                Ok(entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, (key, value))| {
                        let value_json = value.to_json();
                        Iteration {
                            ordinal: i as i64,
                            name: format!("Iteration {i}"),
                            vars: BTreeMap::from([
                                ("key".to_string(), Value::String(key.clone())),
                                ("value".to_string(), value),
                            ]),
                            success_data: json!({
                                "key": key,
                                "value": value_json,
                                "completed": true,
                            }),
                            summary: json!({ "failedAtKey": key }),
                        }
                    })
                    .collect())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl NodeExecutor for ForEachExecutor {
    fn node(&self) -> &Node {
        &self.node
    }

    fn emits_own_records(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &RunContext) -> Result<NodeResult, NodeError> {
        // planning failures still settle a record pair on this node
        let iterations = match self.plan(ctx).await {
            Ok(iterations) => iterations,
            Err(e) => {
                let running =
                    ExecutionRecord::running(self.node.id, ctx.flow_run_id, &self.node.name);
                ctx.status.send(running.clone()).await?;
                ctx.status.send(running.fail(e.to_string())).await?;
                return Err(e);
            }
        };
        drive(
            &self.node,
            &self.spec.condition,
            self.spec.error_policy,
            iterations,
            ctx,
        )
        .await
    }
}

/// Shared iteration engine. Per pass: publish the iteration variables,
/// emit the RUNNING record, check the break condition, run the body
/// sub-graph, then settle the record pair according to the error policy.
async fn drive(
    node: &Node,
    condition: &Comparison,
    policy: ErrorPolicy,
    iterations: Vec<Iteration>,
    ctx: &RunContext,
) -> Result<NodeResult, NodeError> {
    let body: Vec<Id> = ctx.edges.next(node.id, Handle::Loop).to_vec();
    let runner = FlowRunner::new();

    for iteration in iterations {
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Canceled);
        }
        ctx.vars.merge_node(&node.name, iteration.vars).await;

        let running = ExecutionRecord::running(node.id, ctx.flow_run_id, &iteration.name);
        ctx.status.send(running.clone()).await?;

        if !condition.path.is_empty() {
            let snapshot = ctx.vars.snapshot().await;
            let keep = match expr::assert_simple(
                condition.kind,
                &condition.path,
                &condition.value,
                &snapshot,
            ) {
                Ok(keep) => keep,
                Err(e) => {
                    let e = NodeError::from(e);
                    ctx.status.send(running.fail(e.to_string())).await?;
                    return Err(e);
                }
            };
            if !keep {
                break;
            }
        }

        match run_body(&runner, &body, ctx).await {
            Ok(()) => {
                ctx.status.send(running.succeed(iteration.success_data)).await?;
            }
            Err(FlowError::Canceled) => {
                let _ = ctx.status.send(running.cancel()).await;
                return Err(NodeError::Canceled);
            }
            Err(e) => match policy {
                ErrorPolicy::Ignore => continue,
                ErrorPolicy::Break => break,
                ErrorPolicy::Unspecified => {
                    let message = e.to_string();
                    ctx.status.send(running.fail(message.clone())).await?;

                    let mut payload = iteration.summary;
                    payload["totalItems"] = json!(iteration.ordinal + 1);
                    let summary =
                        ExecutionRecord::running(node.id, ctx.flow_run_id, "Error Summary")
                            .fail_with_output(message, payload);
                    ctx.status.send(summary).await?;
                    return Err(unwrap_node_error(e));
                }
            },
        }
    }

    Ok(NodeResult::empty().with_next(ctx.edges.first(node.id, Handle::Then)))
}

async fn run_body(runner: &FlowRunner, body: &[Id], ctx: &RunContext) -> Result<(), FlowError> {
    for target in body {
        runner.run(*target, ctx).await?;
    }
    Ok(())
}

fn unwrap_node_error(e: FlowError) -> NodeError {
    match e {
        FlowError::Node { source, .. } => source,
        FlowError::Canceled => NodeError::Canceled,
        FlowError::Timeout => NodeError::Timeout,
        other => NodeError::Internal(other.to_string()),
    }
}

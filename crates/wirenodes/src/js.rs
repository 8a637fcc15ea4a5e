use async_trait::async_trait;
use boa_engine::{Context, Source};
use std::collections::BTreeMap;
use wirecore::{compress, JsSpec, Node, NodeError, Value};
use wireruntime::{NodeExecutor, NodeResult, RunContext};

/// Script node. Runs the embedded JavaScript against a snapshot of the
/// variable store and publishes the returned object under the node's name.
pub struct JsExecutor {
    node: Node,
    spec: JsSpec,
}

impl JsExecutor {
    pub fn new(node: Node, spec: JsSpec) -> Self {
        Self { node, spec }
    }
}

#[async_trait]
impl NodeExecutor for JsExecutor {
    fn node(&self) -> &Node {
        &self.node
    }

    async fn run(&self, ctx: &RunContext) -> Result<NodeResult, NodeError> {
        let bytes = compress::decompress(&self.spec.code, self.spec.compression)
            .map_err(|e| NodeError::Script(format!("decompress code: {e}")))?;
        let code = String::from_utf8(bytes)
            .map_err(|e| NodeError::Script(format!("code is not utf-8: {e}")))?;

        let snapshot = Value::Object(ctx.vars.snapshot().await).to_json();
        // boa contexts are single-threaded; keep the engine off the runtime
        // threads.
        let output = tokio::task::spawn_blocking(move || run_script(&code, &snapshot))
            .await
            .map_err(|e| NodeError::Internal(format!("script task: {e}")))??;

        let mut outputs = BTreeMap::new();
        match Value::from_json(output.clone()) {
            Value::Object(fields) => outputs = fields,
            Value::Null => {}
            other => {
                outputs.insert("result".to_string(), other);
            }
        }
        Ok(NodeResult::empty()
            .with_output_data(output)
            .with_outputs(outputs))
    }
}

/// Evaluate the script with a read-only `vars` global. The script's return
/// value travels back as JSON text so no engine handles cross the thread
/// boundary.
fn run_script(code: &str, vars: &serde_json::Value) -> Result<serde_json::Value, NodeError> {
    let vars_json = serde_json::to_string(vars)
        .map_err(|e| NodeError::Internal(e.to_string()))?
        .replace('\\', "\\\\")
        .replace('\'', "\\'");

    let wrapped = format!(
        r#"
(function() {{
    var vars = JSON.parse('{vars_json}');
    var __result = (function() {{
{code}
    }})();
    return JSON.stringify(__result === undefined ? null : __result);
}})()
"#
    );

    let mut context = Context::default();
    let value = context
        .eval(Source::from_bytes(&wrapped))
        .map_err(|e| NodeError::Script(e.to_string()))?;
    let text = value
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| NodeError::Script("script returned a non-serializable value".into()))?;
    serde_json::from_str(&text).map_err(|e| NodeError::Script(format!("parse result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use wirecore::{Id, NodeKind, VarStore};
    use wireruntime::{EdgeMap, NodeRegistry, StatusSender};

    fn bare_context(vars: VarStore) -> RunContext {
        let (status, _rx) = StatusSender::channel();
        RunContext::new(
            Id::now(),
            vars,
            Arc::new(EdgeMap::build(&[])),
            Arc::new(NodeRegistry::default()),
            status,
            CancellationToken::new(),
        )
    }

    fn js_node(code: &str) -> JsExecutor {
        let spec = JsSpec::plain(code);
        let node = Node::new(Id::now(), "script", NodeKind::Js(spec.clone()));
        JsExecutor::new(node, spec)
    }

    #[tokio::test]
    async fn returned_object_becomes_outputs() {
        let executor = js_node("return { doubled: vars.input.n * 2 };");
        let vars = VarStore::new();
        vars.write("input", "n", Value::Number(21.0)).await;

        let result = executor.run(&bare_context(vars)).await.unwrap();
        assert_eq!(result.outputs["doubled"], Value::Number(42.0));
    }

    #[tokio::test]
    async fn script_error_carries_original_message() {
        let executor = js_node("throw new Error('boom');");
        let err = executor.run(&bare_context(VarStore::new())).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("script error"), "unexpected: {msg}");
        assert!(msg.contains("boom"), "unexpected: {msg}");
    }

    #[tokio::test]
    async fn compressed_source_runs_transparently() {
        let padding = "// padding line to push the script over the stored-size cutoff\n".repeat(40);
        let code = format!("{padding}return {{ ok: true }};");
        let spec = JsSpec::packed(code.as_str()).unwrap();
        assert_eq!(spec.compression, wirecore::CompressionKind::Zstd);
        let node = Node::new(Id::now(), "script", NodeKind::Js(spec.clone()));
        let executor = JsExecutor::new(node, spec);

        let result = executor.run(&bare_context(VarStore::new())).await.unwrap();
        assert_eq!(result.outputs["ok"], Value::Bool(true));
    }

    #[tokio::test]
    async fn undefined_result_publishes_nothing() {
        let executor = js_node("var unused = 1;");
        let result = executor.run(&bare_context(VarStore::new())).await.unwrap();
        assert!(result.outputs.is_empty());
    }
}

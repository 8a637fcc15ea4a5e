use crate::{Value, VarError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Flow-level variables live under this namespace.
pub const FLOW_NAMESPACE: &str = "var";

/// Hierarchical per-run variable store: `{node_name -> {field -> value}}`.
///
/// Reads take a shared lock, writes an exclusive one. When tracking is
/// enabled every write is mirrored into a delta map, which is what a worker
/// returns to the coordinator after remote execution.
#[derive(Clone, Default)]
pub struct VarStore {
    inner: Arc<RwLock<VarInner>>,
}

#[derive(Default)]
struct VarInner {
    entries: BTreeMap<String, Value>,
    delta: Option<BTreeMap<String, Value>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(VarInner {
                entries: snapshot,
                delta: None,
            })),
        }
    }

    /// Read one field from a node's published variables.
    pub async fn read(&self, node_name: &str, field: &str) -> Result<Value, VarError> {
        let inner = self.inner.read().await;
        let ns = inner
            .entries
            .get(node_name)
            .ok_or_else(|| VarError::NodeNotFound(node_name.to_string()))?;
        match ns {
            Value::Object(map) => map
                .get(field)
                .cloned()
                .ok_or_else(|| VarError::FieldNotFound {
                    node: node_name.to_string(),
                    field: field.to_string(),
                }),
            _ => Err(VarError::NotAnObject(node_name.to_string())),
        }
    }

    /// Write one field under a node's name, creating the namespace if needed.
    pub async fn write(&self, node_name: &str, field: &str, value: Value) {
        let mut inner = self.inner.write().await;
        write_field(&mut inner.entries, node_name, field, value.clone());
        if let Some(delta) = inner.delta.as_mut() {
            write_field(delta, node_name, field, value);
        }
    }

    /// Replace or extend a node's namespace with a whole object at once.
    pub async fn merge_node(&self, node_name: &str, fields: BTreeMap<String, Value>) {
        let mut inner = self.inner.write().await;
        merge_fields(&mut inner.entries, node_name, &fields);
        if let Some(delta) = inner.delta.as_mut() {
            merge_fields(delta, node_name, &fields);
        }
    }

    pub async fn set_flow_var(&self, name: &str, value: Value) {
        self.write(FLOW_NAMESPACE, name, value).await;
    }

    pub async fn flow_var(&self, name: &str) -> Result<Value, VarError> {
        self.read(FLOW_NAMESPACE, name).await
    }

    /// Full copy of the store under a shared lock, for the evaluator.
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner.read().await.entries.clone()
    }

    /// Snapshot of one node's namespace, for input snapshots on records.
    pub async fn node_snapshot(&self, node_name: &str) -> Option<Value> {
        self.inner.read().await.entries.get(node_name).cloned()
    }

    /// Begin mirroring writes into a delta map.
    pub async fn start_tracking(&self) {
        self.inner.write().await.delta = Some(BTreeMap::new());
    }

    /// Stop tracking and return everything written since `start_tracking`.
    pub async fn take_delta(&self) -> BTreeMap<String, Value> {
        self.inner.write().await.delta.take().unwrap_or_default()
    }

    /// Apply a delta returned by a worker.
    pub async fn merge_delta(&self, delta: BTreeMap<String, Value>) {
        let mut inner = self.inner.write().await;
        for (node_name, ns) in delta {
            match ns {
                Value::Object(fields) => merge_fields(&mut inner.entries, &node_name, &fields),
                other => {
                    inner.entries.insert(node_name, other);
                }
            }
        }
    }
}

fn write_field(entries: &mut BTreeMap<String, Value>, node_name: &str, field: &str, value: Value) {
    match entries.get_mut(node_name) {
        Some(Value::Object(map)) => {
            map.insert(field.to_string(), value);
        }
        _ => {
            let mut map = BTreeMap::new();
            map.insert(field.to_string(), value);
            entries.insert(node_name.to_string(), Value::Object(map));
        }
    }
}

fn merge_fields(
    entries: &mut BTreeMap<String, Value>,
    node_name: &str,
    fields: &BTreeMap<String, Value>,
) {
    match entries.get_mut(node_name) {
        Some(Value::Object(map)) => {
            for (k, v) in fields {
                map.insert(k.clone(), v.clone());
            }
        }
        _ => {
            entries.insert(node_name.to_string(), Value::Object(fields.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_after_write() {
        let vars = VarStore::new();
        vars.write("A", "status", Value::Number(200.0)).await;
        assert_eq!(vars.read("A", "status").await.unwrap(), Value::Number(200.0));
    }

    #[tokio::test]
    async fn missing_node_and_field() {
        let vars = VarStore::new();
        assert!(matches!(
            vars.read("A", "x").await,
            Err(VarError::NodeNotFound(_))
        ));
        vars.write("A", "y", Value::Bool(true)).await;
        assert!(matches!(
            vars.read("A", "x").await,
            Err(VarError::FieldNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delta_tracks_only_new_writes() {
        let vars = VarStore::new();
        vars.write("A", "before", Value::Number(1.0)).await;
        vars.start_tracking().await;
        vars.write("B", "after", Value::Number(2.0)).await;
        let delta = vars.take_delta().await;
        assert!(!delta.contains_key("A"));
        let b = delta.get("B").and_then(|v| v.as_object().cloned()).unwrap();
        assert_eq!(b.get("after"), Some(&Value::Number(2.0)));
    }

    #[tokio::test]
    async fn merge_delta_overlays_namespaces() {
        let vars = VarStore::new();
        vars.write("A", "x", Value::Number(1.0)).await;
        let mut ns = BTreeMap::new();
        ns.insert("y".to_string(), Value::Number(2.0));
        let mut delta = BTreeMap::new();
        delta.insert("A".to_string(), Value::Object(ns));
        vars.merge_delta(delta).await;
        assert_eq!(vars.read("A", "x").await.unwrap(), Value::Number(1.0));
        assert_eq!(vars.read("A", "y").await.unwrap(), Value::Number(2.0));
    }

    #[tokio::test]
    async fn flow_vars_live_under_var_namespace() {
        let vars = VarStore::new();
        vars.set_flow_var("env", Value::String("prod".into())).await;
        assert_eq!(
            vars.read(FLOW_NAMESPACE, "env").await.unwrap(),
            Value::String("prod".into())
        );
    }
}

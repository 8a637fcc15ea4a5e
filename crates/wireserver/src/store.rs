use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use wirecore::{Edge, GraphError, Id, Node, NodeKind, NoOpKind};
use wireruntime::FlowGraph;

/// Flow metadata row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Id,
    pub name: String,
}

#[derive(Default, Clone)]
struct Tables {
    flows: HashMap<Id, Flow>,
    nodes: HashMap<Id, Node>,
    edges: HashMap<Id, Edge>,
}

/// In-memory editor storage: one table per entity kind, mutation under a
/// single write lock so batch inserts are all-or-nothing.
#[derive(Clone, Default)]
pub struct FlowStore {
    inner: Arc<RwLock<Tables>>,
}

impl FlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flow together with its undeletable start node.
    pub async fn create_flow(&self, name: impl Into<String>) -> (Flow, Node) {
        let flow = Flow {
            id: Id::now(),
            name: name.into(),
        };
        let start = Node::new(flow.id, "start", NodeKind::NoOp(NoOpKind::Start));
        let mut tables = self.inner.write().await;
        tables.flows.insert(flow.id, flow.clone());
        tables.nodes.insert(start.id, start.clone());
        (flow, start)
    }

    pub async fn list_flows(&self) -> Vec<Flow> {
        let tables = self.inner.read().await;
        let mut flows: Vec<_> = tables.flows.values().cloned().collect();
        flows.sort_by_key(|f| f.id);
        flows
    }

    pub async fn flow(&self, id: Id) -> Option<Flow> {
        self.inner.read().await.flows.get(&id).cloned()
    }

    pub async fn delete_flow(&self, id: Id) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        if tables.flows.remove(&id).is_none() {
            return Err(GraphError::FlowNotFound(id.to_string()));
        }
        tables.nodes.retain(|_, n| n.flow_id != id);
        tables.edges.retain(|_, e| e.flow_id != id);
        Ok(())
    }

    pub async fn node(&self, id: Id) -> Option<Node> {
        self.inner.read().await.nodes.get(&id).cloned()
    }

    pub async fn insert_node(&self, node: Node) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        insert_node_into(&mut tables, node)
    }

    pub async fn update_node(&self, node: Node) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        if !tables.nodes.contains_key(&node.id) {
            return Err(GraphError::NodeNotFound(node.id.to_string()));
        }
        let clash = tables
            .nodes
            .values()
            .any(|n| n.flow_id == node.flow_id && n.id != node.id && n.name == node.name);
        if clash {
            return Err(GraphError::DuplicateName(node.name));
        }
        tables.nodes.insert(node.id, node);
        Ok(())
    }

    /// Deleting a node drops its incident edges. The start no-op is
    /// guarded: the flow must always keep its entry point.
    pub async fn delete_node(&self, id: Id) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        let node = tables
            .nodes
            .get(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        if node.is_start() {
            return Err(GraphError::StartUndeletable);
        }
        tables.nodes.remove(&id);
        tables.edges.retain(|_, e| e.source_id != id && e.target_id != id);
        Ok(())
    }

    pub async fn insert_edge(&self, edge: Edge) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        insert_edge_into(&mut tables, edge)
    }

    pub async fn delete_edge(&self, id: Id) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        match tables.edges.remove(&id) {
            Some(_) => Ok(()),
            None => Err(GraphError::NodeNotFound(id.to_string())),
        }
    }

    /// Bulk insert for importers and editor paste: every entity lands or
    /// none does. Staged on a copy of the tables and swapped in on success.
    pub async fn batch_insert(
        &self,
        flow_id: Id,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<(), GraphError> {
        let mut tables = self.inner.write().await;
        if !tables.flows.contains_key(&flow_id) {
            return Err(GraphError::FlowNotFound(flow_id.to_string()));
        }
        let mut staged = tables.clone();
        for mut node in nodes {
            node.flow_id = flow_id;
            insert_node_into(&mut staged, node)?;
        }
        for mut edge in edges {
            edge.flow_id = flow_id;
            insert_edge_into(&mut staged, edge)?;
        }
        *tables = staged;
        Ok(())
    }

    /// The persisted node and edge lists for one flow, for the runtime.
    pub async fn graph(&self, flow_id: Id) -> Result<FlowGraph, GraphError> {
        let tables = self.inner.read().await;
        if !tables.flows.contains_key(&flow_id) {
            return Err(GraphError::FlowNotFound(flow_id.to_string()));
        }
        let mut nodes: Vec<_> = tables
            .nodes
            .values()
            .filter(|n| n.flow_id == flow_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.id);
        let mut edges: Vec<_> = tables
            .edges
            .values()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.id);
        Ok(FlowGraph::new(nodes, edges))
    }
}

fn insert_node_into(tables: &mut Tables, node: Node) -> Result<(), GraphError> {
    if !tables.flows.contains_key(&node.flow_id) {
        return Err(GraphError::FlowNotFound(node.flow_id.to_string()));
    }
    let clash = tables
        .nodes
        .values()
        .any(|n| n.flow_id == node.flow_id && n.name == node.name);
    if clash {
        return Err(GraphError::DuplicateName(node.name));
    }
    if node.is_start() {
        let has_start = tables
            .nodes
            .values()
            .any(|n| n.flow_id == node.flow_id && n.is_start());
        if has_start {
            return Err(GraphError::MultipleStart);
        }
    }
    tables.nodes.insert(node.id, node);
    Ok(())
}

fn insert_edge_into(tables: &mut Tables, edge: Edge) -> Result<(), GraphError> {
    for endpoint in [edge.source_id, edge.target_id] {
        let known = tables
            .nodes
            .values()
            .any(|n| n.flow_id == edge.flow_id && n.id == endpoint);
        if !known {
            return Err(GraphError::NodeNotFound(endpoint.to_string()));
        }
    }
    tables.edges.insert(edge.id, edge);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecore::Handle;

    #[tokio::test]
    async fn start_node_cannot_be_deleted() {
        let store = FlowStore::new();
        let (_, start) = store.create_flow("demo").await;
        let err = store.delete_node(start.id).await.unwrap_err();
        assert!(matches!(err, GraphError::StartUndeletable));
        assert!(store.node(start.id).await.is_some());
    }

    #[tokio::test]
    async fn deleting_a_node_removes_incident_edges() {
        let store = FlowStore::new();
        let (flow, start) = store.create_flow("demo").await;
        let step = Node::new(flow.id, "step", NodeKind::NoOp(NoOpKind::Unspecified));
        let step_id = step.id;
        store.insert_node(step).await.unwrap();
        store
            .insert_edge(Edge::new(flow.id, start.id, step_id, Handle::Unspecified))
            .await
            .unwrap();

        store.delete_node(step_id).await.unwrap();
        let graph = store.graph(flow.id).await.unwrap();
        assert!(graph.edges.is_empty());
    }

    #[tokio::test]
    async fn batch_insert_is_all_or_nothing() {
        let store = FlowStore::new();
        let (flow, start) = store.create_flow("demo").await;
        let good = Node::new(flow.id, "good", NodeKind::NoOp(NoOpKind::Unspecified));
        let orphan_edge = Edge::new(flow.id, start.id, Id::now(), Handle::Unspecified);

        let result = store
            .batch_insert(flow.id, vec![good.clone()], vec![orphan_edge])
            .await;
        assert!(result.is_err());
        assert!(store.node(good.id).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let store = FlowStore::new();
        let (flow, _) = store.create_flow("demo").await;
        let a = Node::new(flow.id, "step", NodeKind::NoOp(NoOpKind::Unspecified));
        let b = Node::new(flow.id, "step", NodeKind::NoOp(NoOpKind::Unspecified));
        store.insert_node(a).await.unwrap();
        let err = store.insert_node(b).await.unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn second_start_node_is_rejected() {
        let store = FlowStore::new();
        let (flow, _) = store.create_flow("demo").await;
        let second = Node::new(flow.id, "start2", NodeKind::NoOp(NoOpKind::Start));
        let err = store.insert_node(second).await.unwrap_err();
        assert!(matches!(err, GraphError::MultipleStart));
    }
}

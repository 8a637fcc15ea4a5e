use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;
use std::collections::HashMap;
use wirecore::{Edge, GraphError, Id, Node};

/// A loaded flow: the persisted node and edge lists for one flow id.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: Id) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The singular start no-op.
    pub fn start_node(&self) -> Result<&Node, GraphError> {
        let mut starts = self.nodes.iter().filter(|n| n.is_start());
        let first = starts.next().ok_or(GraphError::NoStart)?;
        if starts.next().is_some() {
            return Err(GraphError::MultipleStart);
        }
        Ok(first)
    }

    /// Structural invariants checked at load time: exactly one start node,
    /// unique node names, and every node reachable from start. Loop back
    /// edges are allowed; this is a reachability check, not a cycle check.
    pub fn validate(&self) -> Result<(), GraphError> {
        let start = self.start_node()?;

        let mut names = HashMap::new();
        for node in &self.nodes {
            if names.insert(node.name.as_str(), node.id).is_some() {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
        }

        let mut graph = DiGraph::<Id, ()>::new();
        let mut indices = HashMap::new();
        for node in &self.nodes {
            indices.insert(node.id, graph.add_node(node.id));
        }
        for edge in &self.edges {
            let from = indices
                .get(&edge.source_id)
                .ok_or_else(|| GraphError::NodeNotFound(edge.source_id.to_string()))?;
            let to = indices
                .get(&edge.target_id)
                .ok_or_else(|| GraphError::NodeNotFound(edge.target_id.to_string()))?;
            graph.add_edge(*from, *to, ());
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut dfs = Dfs::new(&graph, indices[&start.id]);
        while let Some(idx) = dfs.next(&graph) {
            seen[idx.index()] = true;
        }
        for (pos, node) in self.nodes.iter().enumerate() {
            if !seen[pos] {
                return Err(GraphError::Unreachable(node.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecore::{Handle, NodeKind, NoOpKind};

    fn noop(flow: Id, name: &str, kind: NoOpKind) -> Node {
        Node::new(flow, name, NodeKind::NoOp(kind))
    }

    #[test]
    fn valid_linear_flow() {
        let flow = Id::now();
        let start = noop(flow, "start", NoOpKind::Start);
        let end = noop(flow, "end", NoOpKind::Unspecified);
        let edge = Edge::new(flow, start.id, end.id, Handle::Unspecified);
        let graph = FlowGraph::new(vec![start, end], vec![edge]);
        graph.validate().unwrap();
    }

    #[test]
    fn missing_start_rejected() {
        let flow = Id::now();
        let graph = FlowGraph::new(vec![noop(flow, "a", NoOpKind::Unspecified)], vec![]);
        assert!(matches!(graph.validate(), Err(GraphError::NoStart)));
    }

    #[test]
    fn two_starts_rejected() {
        let flow = Id::now();
        let graph = FlowGraph::new(
            vec![
                noop(flow, "s1", NoOpKind::Start),
                noop(flow, "s2", NoOpKind::Start),
            ],
            vec![],
        );
        assert!(matches!(graph.validate(), Err(GraphError::MultipleStart)));
    }

    #[test]
    fn unreachable_node_rejected() {
        let flow = Id::now();
        let start = noop(flow, "start", NoOpKind::Start);
        let stranded = noop(flow, "stranded", NoOpKind::Unspecified);
        let graph = FlowGraph::new(vec![start, stranded], vec![]);
        assert!(matches!(graph.validate(), Err(GraphError::Unreachable(_))));
    }

    #[test]
    fn cycles_are_allowed() {
        let flow = Id::now();
        let start = noop(flow, "start", NoOpKind::Start);
        let a = noop(flow, "a", NoOpKind::Unspecified);
        let edges = vec![
            Edge::new(flow, start.id, a.id, Handle::Unspecified),
            Edge::new(flow, a.id, start.id, Handle::Loop),
        ];
        let graph = FlowGraph::new(vec![start, a], edges);
        graph.validate().unwrap();
    }

    #[test]
    fn duplicate_names_rejected() {
        let flow = Id::now();
        let start = noop(flow, "start", NoOpKind::Start);
        let a = noop(flow, "dup", NoOpKind::Unspecified);
        let b = noop(flow, "dup", NoOpKind::Unspecified);
        let edges = vec![
            Edge::new(flow, start.id, a.id, Handle::Unspecified),
            Edge::new(flow, a.id, b.id, Handle::Unspecified),
        ];
        let graph = FlowGraph::new(vec![start, a, b], edges);
        assert!(matches!(graph.validate(), Err(GraphError::DuplicateName(_))));
    }
}

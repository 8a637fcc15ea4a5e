use std::collections::HashMap;
use wirecore::{Edge, Handle, Id};

/// Static index `(source_id, handle) -> [target_id]`, built once per run.
///
/// Targets are ordered by edge id, so when a handle resolves to several
/// edges the first was created first.
pub struct EdgeMap {
    index: HashMap<(Id, Handle), Vec<Id>>,
}

impl EdgeMap {
    pub fn build(edges: &[Edge]) -> Self {
        let mut sorted: Vec<&Edge> = edges.iter().collect();
        sorted.sort_by_key(|e| e.id);
        let mut index: HashMap<(Id, Handle), Vec<Id>> = HashMap::new();
        for edge in sorted {
            index
                .entry((edge.source_id, edge.handle))
                .or_default()
                .push(edge.target_id);
        }
        Self { index }
    }

    /// Targets reachable from `source` over `handle`. Empty means the node is
    /// a terminal sink along that handle.
    pub fn next(&self, source: Id, handle: Handle) -> &[Id] {
        self.index
            .get(&(source, handle))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First target by edge creation order, the default continuation.
    pub fn first(&self, source: Id, handle: Handle) -> Option<Id> {
        self.next(source, handle).first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_handle() {
        let flow = Id::now();
        let a = Id::now();
        let b = Id::now();
        let c = Id::now();
        let edges = vec![
            Edge::new(flow, a, b, Handle::Then),
            Edge::new(flow, a, c, Handle::Else),
        ];
        let map = EdgeMap::build(&edges);
        assert_eq!(map.first(a, Handle::Then), Some(b));
        assert_eq!(map.first(a, Handle::Else), Some(c));
        assert_eq!(map.first(a, Handle::Unspecified), None);
        assert!(map.next(b, Handle::Unspecified).is_empty());
    }

    #[test]
    fn multiple_targets_ordered_by_edge_id() {
        let flow = Id::now();
        let a = Id::now();
        let b = Id::now();
        let c = Id::now();
        let first = Edge::new(flow, a, b, Handle::Unspecified);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Edge::new(flow, a, c, Handle::Unspecified);
        // insertion order reversed; edge id order must win
        let map = EdgeMap::build(&[second, first]);
        assert_eq!(map.first(a, Handle::Unspecified), Some(b));
        assert_eq!(map.next(a, Handle::Unspecified), &[b, c]);
    }
}

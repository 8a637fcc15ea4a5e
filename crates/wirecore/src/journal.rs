use crate::record::{ExecutionRecord, RecordState};
use crate::Id;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default staleness threshold for ghost protection, in milliseconds.
pub const DEFAULT_STALENESS_MS: i64 = 5_000;

/// Append-only journal of node state transitions.
///
/// Records are kept newest-first per node. Appends trust that execution ids
/// are unique; records are never mutated once written.
#[derive(Clone)]
pub struct Journal {
    inner: Arc<RwLock<HashMap<Id, Vec<ExecutionRecord>>>>,
    staleness: Duration,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self::with_staleness(Duration::milliseconds(DEFAULT_STALENESS_MS))
    }

    pub fn with_staleness(staleness: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            staleness,
        }
    }

    pub fn append(&self, record: ExecutionRecord) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entry(record.node_id).or_default().insert(0, record);
    }

    /// Record with the greatest execution id for the node.
    pub fn latest_by_node(&self, node_id: Id) -> Option<ExecutionRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(&node_id)
            .and_then(|records| records.iter().max_by_key(|r| r.execution_id))
            .cloned()
    }

    /// All records for the node, newest-first.
    pub fn list_by_node(&self, node_id: Id) -> Vec<ExecutionRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(&node_id).cloned().unwrap_or_default()
    }

    /// State surfaced to clients for a node.
    ///
    /// An unterminated RUNNING older than the staleness threshold is a ghost
    /// left behind by a crashed executor and reports UNSPECIFIED.
    pub fn effective_state(&self, node_id: Id) -> RecordState {
        let Some(latest) = self.latest_by_node(node_id) else {
            return RecordState::Unspecified;
        };
        if latest.completed_at.is_some() || latest.state != RecordState::Running {
            return latest.state;
        }
        for record in self.list_by_node(node_id) {
            if record.completed_at.is_some() {
                return record.state;
            }
        }
        if Utc::now() - latest.execution_id.timestamp() > self.staleness {
            return RecordState::Unspecified;
        }
        RecordState::Running
    }

    /// Latest error text for the node, used as `info` by the node-list surface.
    pub fn latest_error(&self, node_id: Id) -> Option<String> {
        self.list_by_node(node_id)
            .into_iter()
            .find_map(|r| r.error)
    }
}

use crate::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one node invocation as seen in the journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    #[default]
    Unspecified,
    Running,
    Success,
    Failure,
    Canceled,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Success | RecordState::Failure | RecordState::Canceled
        )
    }
}

/// One journal entry describing a state transition of one node during a run.
///
/// A RUNNING record and its terminal counterpart share the same
/// `execution_id`; the id is time-ordered, so the newest record for a node is
/// the one with the greatest id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Id,
    pub node_id: Id,
    pub flow_run_id: Id,
    /// Human-facing label; "Iteration N" or "Error Summary" for loops.
    pub name: String,
    pub state: RecordState,
    #[serde(default)]
    pub output_data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_snapshot: Option<serde_json::Value>,
}

impl ExecutionRecord {
    /// Open a new invocation: allocates a fresh execution id.
    pub fn running(node_id: Id, flow_run_id: Id, name: impl Into<String>) -> Self {
        Self {
            execution_id: Id::now(),
            node_id,
            flow_run_id,
            name: name.into(),
            state: RecordState::Running,
            output_data: serde_json::Value::Null,
            error: None,
            completed_at: None,
            input_snapshot: None,
        }
    }

    pub fn with_input_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.input_snapshot = Some(snapshot);
        self
    }

    /// Close this invocation with SUCCESS, keeping the execution id so the
    /// pair stays joined.
    pub fn succeed(&self, output_data: serde_json::Value) -> Self {
        self.terminal(RecordState::Success, output_data, None)
    }

    pub fn fail(&self, error: impl Into<String>) -> Self {
        self.terminal(RecordState::Failure, serde_json::Value::Null, Some(error.into()))
    }

    pub fn fail_with_output(&self, error: impl Into<String>, output_data: serde_json::Value) -> Self {
        self.terminal(RecordState::Failure, output_data, Some(error.into()))
    }

    pub fn cancel(&self) -> Self {
        self.terminal(RecordState::Canceled, serde_json::Value::Null, Some("canceled".into()))
    }

    fn terminal(
        &self,
        state: RecordState,
        output_data: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            execution_id: self.execution_id,
            node_id: self.node_id,
            flow_run_id: self.flow_run_id,
            name: self.name.clone(),
            state,
            output_data,
            error,
            completed_at: Some(Utc::now()),
            input_snapshot: None,
        }
    }
}

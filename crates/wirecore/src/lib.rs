//! Core types for the wireflow engine.
//!
//! Identifiers, the node/edge model, dynamic values, the per-run variable
//! store, the execution record journal, and the expression evaluator. All
//! other crates depend on this one.

pub mod compress;
mod error;
pub mod expr;
mod id;
mod journal;
mod node;
mod record;
mod value;
mod vars;

pub use compress::CompressionKind;
pub use error::{ExprError, FlowError, GraphError, NodeError, VarError};
pub use id::{Id, IdError};
pub use journal::{Journal, DEFAULT_STALENESS_MS};
pub use node::{
    Comparison, ComparisonKind, ConditionSpec, Edge, ErrorPolicy, ExecutionTarget, ForEachSpec,
    ForSpec, Handle, JsSpec, Node, NodeKind, NoOpKind, Position, RequestSpec,
};
pub use record::{ExecutionRecord, RecordState};
pub use value::Value;
pub use vars::{VarStore, FLOW_NAMESPACE};

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

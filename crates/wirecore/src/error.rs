use crate::IdError;
use thiserror::Error;

/// Errors surfaced in execution record `error` fields and on the run stream.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout")]
    Timeout,

    #[error("canceled")]
    Canceled,

    #[error("transport error: {0}")]
    Transport(String),

    /// Messages for condition nodes carry an "evaluate condition expression"
    /// or "normalize condition expression" prefix so clients can classify.
    #[error("{0}")]
    Evaluation(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ExprError> for NodeError {
    fn from(e: ExprError) -> Self {
        NodeError::Evaluation(e.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum ExprError {
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("normalize error: {0}")]
    Normalize(String),
}

#[derive(Error, Debug, Clone)]
pub enum VarError {
    #[error("no variables published under '{0}'")]
    NodeNotFound(String),

    #[error("'{node}' has no field '{field}'")]
    FieldNotFound { node: String, field: String },

    #[error("'{0}' is not an object")]
    NotAnObject(String),
}

impl From<VarError> for NodeError {
    fn from(e: VarError) -> Self {
        NodeError::NotFound(e.to_string())
    }
}

/// Graph-shape errors raised when loading or editing a flow.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("flow has no start node")]
    NoStart,

    #[error("flow has more than one start node")]
    MultipleStart,

    #[error("node '{0}' is not reachable from start")]
    Unreachable(String),

    #[error("the start node cannot be deleted")]
    StartUndeletable,

    #[error("duplicate node name '{0}'")]
    DuplicateName(String),
}

/// Top-level error for a flow run.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("node '{name}' failed: {source}")]
    Node {
        name: String,
        #[source]
        source: NodeError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run canceled")]
    Canceled,

    #[error("flow timeout exceeded")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn node(name: impl Into<String>, source: NodeError) -> Self {
        FlowError::Node {
            name: name.into(),
            source,
        }
    }
}

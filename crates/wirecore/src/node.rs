use crate::compress::CompressionKind;
use crate::Id;
use serde::{Deserialize, Serialize};

/// A node in a flow graph.
///
/// The kind carries the per-kind specialization directly, matching the
/// persisted layout of one base row plus one specialization row keyed by
/// node id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub flow_id: Id,
    /// Unique within a flow; variables produced by the node are published
    /// under this name.
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    /// Where the node runs when a coordinator is driving the flow.
    #[serde(default)]
    pub target: ExecutionTarget,
}

impl Node {
    pub fn new(flow_id: Id, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: Id::now(),
            flow_id,
            name: name.into(),
            kind,
            position: Position::default(),
            target: ExecutionTarget::Local,
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn remote(mut self) -> Self {
        self.target = ExecutionTarget::Remote;
        self
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, NodeKind::NoOp(NoOpKind::Start))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum NodeKind {
    NoOp(NoOpKind),
    Request(RequestSpec),
    Condition(ConditionSpec),
    For(ForSpec),
    ForEach(ForEachSpec),
    Js(JsSpec),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::NoOp(_) => "no_op",
            NodeKind::Request(_) => "request",
            NodeKind::Condition(_) => "condition",
            NodeKind::For(_) => "for",
            NodeKind::ForEach(_) => "for_each",
            NodeKind::Js(_) => "js",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpKind {
    #[default]
    Unspecified,
    /// Singular per flow and undeletable.
    Start,
    Create,
    Then,
    Else,
    Loop,
}

/// References external request-template records held by the endpoint store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    pub endpoint_id: Option<Id>,
    pub example_id: Option<Id>,
    pub delta_endpoint_id: Option<Id>,
    pub delta_example_id: Option<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub comparison: Comparison,
}

/// A single user-authored comparison.
///
/// When `expression` is non-empty it is evaluated as written; otherwise the
/// comparison is normalized from `path`, `kind` and `value`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kind: ComparisonKind,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub expression: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    #[default]
    Unspecified,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForSpec {
    pub iter_count: i64,
    #[serde(default)]
    pub condition: Comparison,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForEachSpec {
    /// Path into the variable store that must yield an ordered sequence or a
    /// keyed mapping.
    pub iter_expression: String,
    #[serde(default)]
    pub condition: Comparison,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

/// How a loop reacts to a failing body iteration.
/// `Unspecified` propagates with an Error Summary record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Unspecified,
    Ignore,
    Break,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsSpec {
    #[serde(with = "serde_bytes_base64")]
    pub code: Vec<u8>,
    #[serde(default)]
    pub compression: CompressionKind,
}

impl JsSpec {
    pub fn plain(code: impl Into<String>) -> Self {
        Self {
            code: code.into().into_bytes(),
            compression: CompressionKind::None,
        }
    }

    /// Store the source compressed when that pays off.
    pub fn packed(code: impl Into<String>) -> std::io::Result<Self> {
        let (code, compression) = crate::compress::maybe_compress(code.into().as_bytes())?;
        Ok(Self { code, compression })
    }
}

/// Script bytes travel as base64 inside JSON payloads.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Which output of a source node activates an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    #[default]
    Unspecified,
    Then,
    Else,
    Loop,
}

/// A directed connection from one node's labeled output to another node.
/// Static after flow load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub flow_id: Id,
    pub source_id: Id,
    pub target_id: Id,
    #[serde(default)]
    pub handle: Handle,
}

impl Edge {
    pub fn new(flow_id: Id, source_id: Id, target_id: Id, handle: Handle) -> Self {
        Self {
            id: Id::now(),
            flow_id,
            source_id,
            target_id,
            handle,
        }
    }
}

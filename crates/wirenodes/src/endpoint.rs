use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use wirecore::{Id, NodeError};

/// A stored request template: the method and URL the editor bound to a
/// request node.
#[derive(Debug, Clone, Default)]
pub struct EndpointTemplate {
    pub id: Id,
    pub method: String,
    pub url: String,
}

/// Saved parameters for one invocation of an endpoint: headers, query
/// params, and body captured by the editor or an importer.
#[derive(Debug, Clone, Default)]
pub struct RequestExample {
    pub id: Id,
    pub endpoint_id: Id,
    pub headers: Vec<(String, String)>,
    pub queries: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    None,
    Raw(Vec<u8>),
    Form(Vec<(String, String)>),
    UrlEncoded(Vec<(String, String)>),
}

/// Storage for endpoint templates and their examples. The request executor
/// resolves its bound ids here at run time.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn endpoint(&self, id: Id) -> Result<EndpointTemplate, NodeError>;
    async fn example(&self, id: Id) -> Result<RequestExample, NodeError>;
}

/// In-memory store used by the CLI and by tests.
#[derive(Default)]
pub struct MemoryEndpointStore {
    endpoints: RwLock<HashMap<Id, EndpointTemplate>>,
    examples: RwLock<HashMap<Id, RequestExample>>,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_endpoint(&self, endpoint: EndpointTemplate) {
        let mut map = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        map.insert(endpoint.id, endpoint);
    }

    pub fn insert_example(&self, example: RequestExample) {
        let mut map = self.examples.write().unwrap_or_else(|e| e.into_inner());
        map.insert(example.id, example);
    }
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn endpoint(&self, id: Id) -> Result<EndpointTemplate, NodeError> {
        let map = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        map.get(&id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("endpoint missing: {id}")))
    }

    async fn example(&self, id: Id) -> Result<RequestExample, NodeError> {
        let map = self.examples.read().unwrap_or_else(|e| e.into_inner());
        map.get(&id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("example missing: {id}")))
    }
}

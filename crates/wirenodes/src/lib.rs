//! Built-in node library.
//!
//! One executor per node kind, plus the factory that binds persisted node
//! models to executors at run start. Request nodes reach the network
//! through injected storage and transport seams.

mod condition;
mod endpoint;
mod js;
mod loops;
mod noop;
mod request;

pub use condition::ConditionExecutor;
pub use endpoint::{
    EndpointStore, EndpointTemplate, MemoryEndpointStore, RequestBody, RequestExample,
};
pub use js::JsExecutor;
pub use loops::{ForEachExecutor, ForExecutor};
pub use noop::NoOpExecutor;
pub use request::{
    bind_endpoint, HttpCall, HttpReply, HttpTransport, RequestExecutor, ReqwestTransport,
};

use std::sync::Arc;
use wirecore::{Node, NodeError, NodeKind};
use wireruntime::{ExecutorFactory, NodeExecutor};

/// Builds the built-in executor for each node kind. Constructed once per
/// service with its storage and transport dependencies.
pub struct BuiltinFactory {
    endpoints: Arc<dyn EndpointStore>,
    transport: Arc<dyn HttpTransport>,
}

impl BuiltinFactory {
    pub fn new(endpoints: Arc<dyn EndpointStore>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoints,
            transport,
        }
    }

    /// In-memory endpoint storage and a real HTTP client: what the CLI and
    /// the worker binary use.
    pub fn local(endpoints: Arc<MemoryEndpointStore>) -> Self {
        Self::new(endpoints, Arc::new(ReqwestTransport::default()))
    }
}

impl ExecutorFactory for BuiltinFactory {
    fn build(&self, node: &Node) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        Ok(match &node.kind {
            NodeKind::NoOp(_) => Arc::new(NoOpExecutor::new(node.clone())),
            NodeKind::Condition(spec) => {
                Arc::new(ConditionExecutor::new(node.clone(), spec.clone()))
            }
            NodeKind::Request(spec) => Arc::new(RequestExecutor::new(
                node.clone(),
                spec.clone(),
                self.endpoints.clone(),
                self.transport.clone(),
            )),
            NodeKind::For(spec) => Arc::new(ForExecutor::new(node.clone(), spec.clone())),
            NodeKind::ForEach(spec) => Arc::new(ForEachExecutor::new(node.clone(), spec.clone())),
            NodeKind::Js(spec) => Arc::new(JsExecutor::new(node.clone(), spec.clone())),
        })
    }
}

//! Flow execution runtime.
//!
//! The interpreter that walks a node graph, the per-run context and edge
//! index, the coordinator/worker split for distributed execution, and the
//! status proxy that serializes record emission.

mod context;
mod coordinator;
mod dispatch;
mod edge_map;
mod graph;
mod registry;
mod runner;
mod status;
mod worker;

pub use context::RunContext;
pub use coordinator::{Coordinator, RunOptions};
pub use dispatch::{RemoteOutcome, WorkerClient};
pub use edge_map::EdgeMap;
pub use graph::FlowGraph;
pub use registry::{
    run_detached, Continuation, ExecutorFactory, NodeExecutor, NodeRegistry, NodeResult,
};
pub use runner::FlowRunner;
pub use status::{
    pump_status, MemorySubscriber, NullSubscriber, RecordSubscriber, StatusSender,
    STATUS_CHANNEL_CAPACITY,
};
pub use worker::{InProcessWorker, WorkerExecutor};

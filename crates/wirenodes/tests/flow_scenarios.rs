//! End-to-end flow runs through the coordinator with the built-in node
//! library, asserting on the execution record journal.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wirecore::{
    Comparison, ConditionSpec, Edge, ErrorPolicy, ExecutionRecord, FlowError, ForEachSpec,
    ForSpec, Handle, Id, Journal, Node, NodeError, NodeKind, NoOpKind, RecordState, Value,
    VarStore,
};
use wirenodes::{
    bind_endpoint, BuiltinFactory, HttpCall, HttpReply, HttpTransport, MemoryEndpointStore,
};
use wireruntime::{
    Coordinator, FlowGraph, InProcessWorker, MemorySubscriber, RunOptions, WorkerExecutor,
};

struct StubTransport {
    reply: HttpReply,
    delay: Option<Duration>,
}

impl StubTransport {
    fn json(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: HttpReply {
                status,
                headers: vec![("content-type".into(), "application/json".into())],
                body: body.as_bytes().to_vec(),
            },
            delay: None,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: HttpReply {
                status: 200,
                headers: vec![],
                body: vec![],
            },
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, _call: HttpCall) -> Result<HttpReply, NodeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.reply.clone())
    }
}

struct Harness {
    flow_id: Id,
    store: Arc<MemoryEndpointStore>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Harness {
    fn new() -> Self {
        Self {
            flow_id: Id::now(),
            store: Arc::new(MemoryEndpointStore::new()),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    fn add(&mut self, name: &str, kind: NodeKind) -> Id {
        let node = Node::new(self.flow_id, name, kind);
        let id = node.id;
        self.nodes.push(node);
        id
    }

    fn add_remote(&mut self, name: &str, kind: NodeKind) -> Id {
        let node = Node::new(self.flow_id, name, kind).remote();
        let id = node.id;
        self.nodes.push(node);
        id
    }

    fn start(&mut self) -> Id {
        self.add("start", NodeKind::NoOp(NoOpKind::Start))
    }

    fn request(&mut self, name: &str, method: &str, url: &str) -> Id {
        let spec = bind_endpoint(&self.store, method, url);
        self.add(name, NodeKind::Request(spec))
    }

    fn connect(&mut self, source: Id, target: Id, handle: Handle) {
        self.edges.push(Edge::new(self.flow_id, source, target, handle));
    }

    fn graph(&self) -> FlowGraph {
        FlowGraph::new(self.nodes.clone(), self.edges.clone())
    }

    fn coordinator(&self, transport: Arc<dyn HttpTransport>) -> Coordinator {
        let factory = Arc::new(BuiltinFactory::new(self.store.clone(), transport));
        Coordinator::new(factory, Journal::new())
    }

    async fn run(
        &self,
        coordinator: &Coordinator,
        vars: VarStore,
        opts: RunOptions,
    ) -> Result<(), FlowError> {
        coordinator
            .run_flow(&self.graph(), vars, Arc::new(MemorySubscriber::new()), opts)
            .await
    }
}

fn condition(expression: &str) -> NodeKind {
    NodeKind::Condition(ConditionSpec {
        comparison: Comparison {
            expression: expression.to_string(),
            ..Default::default()
        },
    })
}

fn for_each(iter_expression: &str, error_policy: ErrorPolicy) -> NodeKind {
    NodeKind::ForEach(ForEachSpec {
        iter_expression: iter_expression.to_string(),
        error_policy,
        ..Default::default()
    })
}

/// Journal order is newest-first; tests read in emission order.
fn emitted(journal: &Journal, node_id: Id) -> Vec<ExecutionRecord> {
    let mut records = journal.list_by_node(node_id);
    records.reverse();
    records
}

fn assert_paired(records: &[ExecutionRecord]) {
    let mut open: BTreeMap<Id, usize> = BTreeMap::new();
    for record in records {
        if record.state == RecordState::Running {
            assert!(
                open.insert(record.execution_id, 1).is_none(),
                "duplicate RUNNING for execution {}",
                record.execution_id
            );
        } else {
            assert!(
                open.remove(&record.execution_id).is_some(),
                "terminal without preceding RUNNING for execution {}",
                record.execution_id
            );
        }
    }
}

#[tokio::test]
async fn linear_two_step_flow_succeeds() {
    let mut h = Harness::new();
    let start = h.start();
    let a = h.request("A", "GET", "http://svc/ping");
    let end = h.add("end", NodeKind::NoOp(NoOpKind::Unspecified));
    h.connect(start, a, Handle::Unspecified);
    h.connect(a, end, Handle::Unspecified);

    let coordinator = h.coordinator(StubTransport::json(200, r#"{"pong":true}"#));
    let vars = VarStore::new();
    h.run(&coordinator, vars.clone(), RunOptions::default())
        .await
        .unwrap();

    for id in [start, a, end] {
        let records = emitted(coordinator.journal(), id);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, RecordState::Running);
        assert_eq!(records[1].state, RecordState::Success);
        assert_eq!(records[0].execution_id, records[1].execution_id);
        assert_paired(&records);
    }
    assert_eq!(vars.read("A", "response").await.unwrap().as_object().unwrap()["status"],
        Value::Number(200.0));
}

#[tokio::test]
async fn condition_true_traverses_then_branch_only() {
    let mut h = Harness::new();
    let start = h.start();
    let if_node = h.add("ifNode", condition("1 == 1"));
    let t = h.add("T", NodeKind::NoOp(NoOpKind::Then));
    let f = h.add("F", NodeKind::NoOp(NoOpKind::Else));
    h.connect(start, if_node, Handle::Unspecified);
    h.connect(if_node, t, Handle::Then);
    h.connect(if_node, f, Handle::Else);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, VarStore::new(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(emitted(coordinator.journal(), t).len(), 2);
    assert!(emitted(coordinator.journal(), f).is_empty());
}

#[tokio::test]
async fn condition_false_traverses_else_branch() {
    let mut h = Harness::new();
    let start = h.start();
    let if_node = h.add("ifNode", condition("1 == 2"));
    let t = h.add("T", NodeKind::NoOp(NoOpKind::Then));
    let f = h.add("F", NodeKind::NoOp(NoOpKind::Else));
    h.connect(start, if_node, Handle::Unspecified);
    h.connect(if_node, t, Handle::Then);
    h.connect(if_node, f, Handle::Else);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, VarStore::new(), RunOptions::default())
        .await
        .unwrap();

    assert!(emitted(coordinator.journal(), t).is_empty());
    assert_eq!(emitted(coordinator.journal(), f).len(), 2);
}

#[tokio::test]
async fn invalid_condition_surfaces_classified_error() {
    let mut h = Harness::new();
    let start = h.start();
    let bad = h.add("ifBad", condition("this is not valid expr"));
    let t = h.add("T", NodeKind::NoOp(NoOpKind::Then));
    h.connect(start, bad, Handle::Unspecified);
    h.connect(bad, t, Handle::Then);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    let result = h
        .run(&coordinator, VarStore::new(), RunOptions::default())
        .await;
    assert!(result.is_err());

    let records = emitted(coordinator.journal(), bad);
    let terminal = records.last().unwrap();
    assert_eq!(terminal.state, RecordState::Failure);
    assert!(terminal.completed_at.is_some());
    let error = terminal.error.clone().unwrap().to_lowercase();
    assert!(
        error.contains("evaluate condition expression")
            || error.contains("normalize condition expression"),
        "unexpected error: {error}"
    );
    assert_eq!(
        coordinator.journal().effective_state(bad),
        RecordState::Failure
    );
    assert!(coordinator.journal().latest_error(bad).is_some());
}

#[tokio::test]
async fn for_each_array_emits_one_pair_per_element() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add("each", for_each("var.testArray", ErrorPolicy::Unspecified));
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    let after = h.add("after", NodeKind::NoOp(NoOpKind::Then));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);
    h.connect(each, after, Handle::Then);

    let vars = VarStore::new();
    vars.set_flow_var(
        "testArray",
        Value::Array(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
            Value::Number(4.0),
        ]),
    )
    .await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, vars, RunOptions::default()).await.unwrap();

    let records = emitted(coordinator.journal(), each);
    assert_eq!(records.len(), 8);
    assert_paired(&records);
    for i in 0..4 {
        let running = &records[i * 2];
        let success = &records[i * 2 + 1];
        assert_eq!(running.name, format!("Iteration {i}"));
        assert_eq!(running.state, RecordState::Running);
        assert_eq!(success.state, RecordState::Success);
        assert_eq!(success.execution_id, running.execution_id);
        assert_eq!(success.output_data["index"], i as i64);
        assert_eq!(success.output_data["value"], (i + 1) as f64);
        assert_eq!(success.output_data["completed"], true);
    }
    assert!(records.iter().all(|r| r.name != "Error Summary"));
    assert_eq!(emitted(coordinator.journal(), after).len(), 2);
}

#[tokio::test]
async fn for_each_propagate_policy_stops_at_first_failure() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add("each", for_each("var.testArray", ErrorPolicy::Unspecified));
    let body = h.add("body", condition("not a valid expression"));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);

    let vars = VarStore::new();
    vars.set_flow_var(
        "testArray",
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
    )
    .await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    let result = h.run(&coordinator, vars, RunOptions::default()).await;
    assert!(result.is_err());

    let records = emitted(coordinator.journal(), each);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "Iteration 0");
    assert_eq!(records[0].state, RecordState::Running);
    assert_eq!(records[1].name, "Iteration 0");
    assert_eq!(records[1].state, RecordState::Failure);
    assert_eq!(records[2].name, "Error Summary");
    assert_eq!(records[2].state, RecordState::Failure);
    assert_eq!(records[2].output_data["failedAtIndex"], 0);
    assert_eq!(records[2].output_data["totalItems"], 1);
    assert!(records.iter().all(|r| r.name != "Iteration 1"));
}

#[tokio::test]
async fn for_each_ignore_policy_swallows_body_failures() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add("each", for_each("var.testArray", ErrorPolicy::Ignore));
    let body = h.add("body", condition("not a valid expression"));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);

    let vars = VarStore::new();
    vars.set_flow_var(
        "testArray",
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
    )
    .await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, vars, RunOptions::default()).await.unwrap();

    let records = emitted(coordinator.journal(), each);
    let running: Vec<_> = records
        .iter()
        .filter(|r| r.state == RecordState::Running)
        .collect();
    assert_eq!(running.len(), 3);
    assert!(records.iter().all(|r| r.state != RecordState::Failure));
}

#[tokio::test]
async fn scalar_iter_expression_fails_with_record() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add(
        "each",
        for_each("var.notACollection", ErrorPolicy::Unspecified),
    );
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);

    let vars = VarStore::new();
    vars.set_flow_var("notACollection", Value::Number(5.0)).await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    let result = h.run(&coordinator, vars, RunOptions::default()).await;
    assert!(result.is_err());

    let records = emitted(coordinator.journal(), each);
    assert_eq!(records.len(), 2);
    assert_paired(&records);
    assert_eq!(records[0].name, "each");
    assert_eq!(records[0].state, RecordState::Running);
    assert_eq!(records[1].state, RecordState::Failure);
    assert!(records[1].error.clone().unwrap().contains("type mismatch"));
    assert_eq!(
        coordinator.journal().effective_state(each),
        RecordState::Failure
    );
    assert!(emitted(coordinator.journal(), body).is_empty());
}

#[tokio::test]
async fn invalid_break_condition_settles_iteration_record() {
    let mut h = Harness::new();
    let start = h.start();
    let looper = h.add(
        "looper",
        NodeKind::For(ForSpec {
            iter_count: 3,
            condition: Comparison {
                path: "looper.index".to_string(),
                value: "2".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }),
    );
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    h.connect(start, looper, Handle::Unspecified);
    h.connect(looper, body, Handle::Loop);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    let result = h
        .run(&coordinator, VarStore::new(), RunOptions::default())
        .await;
    assert!(result.is_err());

    let records = emitted(coordinator.journal(), looper);
    assert_eq!(records.len(), 2);
    assert_paired(&records);
    assert_eq!(records[0].name, "Iteration 0");
    assert_eq!(records[1].state, RecordState::Failure);
    assert!(records[1].error.clone().unwrap().contains("unspecified"));
    assert!(emitted(coordinator.journal(), body).is_empty());
}

#[tokio::test]
async fn for_each_map_mode_uses_key_value_shape() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add("each", for_each("var.settings", ErrorPolicy::Unspecified));
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);

    let vars = VarStore::new();
    let mut map = BTreeMap::new();
    map.insert("alpha".to_string(), Value::Number(1.0));
    map.insert("beta".to_string(), Value::Number(2.0));
    vars.set_flow_var("settings", Value::Object(map)).await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, vars, RunOptions::default()).await.unwrap();

    let records = emitted(coordinator.journal(), each);
    assert_eq!(records.len(), 4);
    let first_success = &records[1];
    assert_eq!(first_success.output_data["key"], "alpha");
    assert_eq!(first_success.output_data["value"], 1.0);
    assert!(first_success.output_data.get("index").is_none());
}

#[tokio::test]
async fn empty_collection_skips_straight_to_then() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add("each", for_each("var.testArray", ErrorPolicy::Unspecified));
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    let after = h.add("after", NodeKind::NoOp(NoOpKind::Then));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);
    h.connect(each, after, Handle::Then);

    let vars = VarStore::new();
    vars.set_flow_var("testArray", Value::Array(vec![])).await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, vars, RunOptions::default()).await.unwrap();

    assert!(emitted(coordinator.journal(), each).is_empty());
    assert!(emitted(coordinator.journal(), body).is_empty());
    assert_eq!(emitted(coordinator.journal(), after).len(), 2);
}

#[tokio::test]
async fn zero_count_for_node_transitions_cleanly() {
    let mut h = Harness::new();
    let start = h.start();
    let looper = h.add(
        "looper",
        NodeKind::For(ForSpec {
            iter_count: 0,
            ..Default::default()
        }),
    );
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    let after = h.add("after", NodeKind::NoOp(NoOpKind::Then));
    h.connect(start, looper, Handle::Unspecified);
    h.connect(looper, body, Handle::Loop);
    h.connect(looper, after, Handle::Then);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, VarStore::new(), RunOptions::default())
        .await
        .unwrap();

    assert!(emitted(coordinator.journal(), looper).is_empty());
    assert_eq!(emitted(coordinator.journal(), after).len(), 2);
}

#[tokio::test]
async fn for_node_publishes_index_and_total() {
    let mut h = Harness::new();
    let start = h.start();
    let looper = h.add(
        "looper",
        NodeKind::For(ForSpec {
            iter_count: 3,
            ..Default::default()
        }),
    );
    let body = h.add("body", NodeKind::NoOp(NoOpKind::Loop));
    h.connect(start, looper, Handle::Unspecified);
    h.connect(looper, body, Handle::Loop);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    let vars = VarStore::new();
    h.run(&coordinator, vars.clone(), RunOptions::default())
        .await
        .unwrap();

    let records = emitted(coordinator.journal(), looper);
    assert_eq!(records.len(), 6);
    assert_paired(&records);
    assert_eq!(records[5].output_data["index"], 2);
    assert_eq!(records[5].output_data["completed"], true);
    assert_eq!(vars.read("looper", "totalItems").await.unwrap(), Value::Number(3.0));
}

#[tokio::test]
async fn break_policy_stops_without_failure_records() {
    let mut h = Harness::new();
    let start = h.start();
    let each = h.add("each", for_each("var.testArray", ErrorPolicy::Break));
    let body = h.add("body", condition("not a valid expression"));
    let after = h.add("after", NodeKind::NoOp(NoOpKind::Then));
    h.connect(start, each, Handle::Unspecified);
    h.connect(each, body, Handle::Loop);
    h.connect(each, after, Handle::Then);

    let vars = VarStore::new();
    vars.set_flow_var(
        "testArray",
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
    )
    .await;

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, vars, RunOptions::default()).await.unwrap();

    let records = emitted(coordinator.journal(), each);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, RecordState::Running);
    assert_eq!(emitted(coordinator.journal(), after).len(), 2);
}

#[tokio::test]
async fn no_outgoing_edge_terminates_branch_without_error() {
    let mut h = Harness::new();
    let start = h.start();
    let if_node = h.add("ifNode", condition("1 == 1"));
    let f = h.add("F", NodeKind::NoOp(NoOpKind::Else));
    h.connect(start, if_node, Handle::Unspecified);
    h.connect(if_node, f, Handle::Else);

    let coordinator = h.coordinator(StubTransport::json(200, "{}"));
    h.run(&coordinator, VarStore::new(), RunOptions::default())
        .await
        .unwrap();
    assert!(emitted(coordinator.journal(), f).is_empty());
}

#[tokio::test]
async fn cancellation_emits_canceled_record() {
    let mut h = Harness::new();
    let start = h.start();
    let slow = h.request("slow", "GET", "http://svc/slow");
    h.connect(start, slow, Handle::Unspecified);

    let cancel = CancellationToken::new();
    let opts = RunOptions {
        cancel: cancel.clone(),
        ..Default::default()
    };
    let coordinator = h.coordinator(StubTransport::slow(Duration::from_secs(30)));

    let handle = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let result = h.run(&coordinator, VarStore::new(), opts).await;
    assert!(matches!(result, Err(FlowError::Canceled)));

    let records = emitted(coordinator.journal(), slow);
    assert_eq!(records.last().unwrap().state, RecordState::Canceled);
    assert!(records.last().unwrap().completed_at.is_some());
}

#[tokio::test]
async fn node_timeout_fails_the_node() {
    let mut h = Harness::new();
    let start = h.start();
    let slow = h.request("slow", "GET", "http://svc/slow");
    h.connect(start, slow, Handle::Unspecified);

    let opts = RunOptions {
        node_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let coordinator = h.coordinator(StubTransport::slow(Duration::from_secs(30)));
    let result = h.run(&coordinator, VarStore::new(), opts).await;
    assert!(result.is_err());

    let records = emitted(coordinator.journal(), slow);
    let terminal = records.last().unwrap();
    assert_eq!(terminal.state, RecordState::Failure);
    assert!(terminal.error.clone().unwrap().contains("timeout"));
}

#[tokio::test]
async fn flow_timeout_settles_the_in_flight_node() {
    let mut h = Harness::new();
    let start = h.start();
    let slow = h.request("slow", "GET", "http://svc/slow");
    h.connect(start, slow, Handle::Unspecified);

    let opts = RunOptions {
        flow_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let coordinator = h.coordinator(StubTransport::slow(Duration::from_secs(30)));
    let result = h.run(&coordinator, VarStore::new(), opts).await;
    assert!(matches!(result, Err(FlowError::Timeout)));

    let records = emitted(coordinator.journal(), slow);
    assert_eq!(records.len(), 2);
    let terminal = records.last().unwrap();
    assert_eq!(terminal.state, RecordState::Canceled);
    assert_eq!(terminal.execution_id, records[0].execution_id);
    assert!(terminal.completed_at.is_some());
}

#[tokio::test]
async fn remote_node_round_trips_through_worker() {
    let mut h = Harness::new();
    let start = h.start();
    let remote = h.add_remote("remoteStep", condition("1 == 1"));
    let t = h.add("T", NodeKind::NoOp(NoOpKind::Then));
    h.connect(start, remote, Handle::Unspecified);
    h.connect(remote, t, Handle::Then);

    let factory = Arc::new(BuiltinFactory::new(
        h.store.clone(),
        StubTransport::json(200, "{}"),
    ));
    let worker = WorkerExecutor::new(factory.clone(), Journal::new(), h.graph());
    let opts = RunOptions {
        worker: Some(Arc::new(InProcessWorker::new(worker))),
        ..Default::default()
    };

    let coordinator = Coordinator::new(factory, Journal::new());
    let vars = VarStore::new();
    vars.set_flow_var("seed", Value::Number(7.0)).await;
    h.run(&coordinator, vars, opts).await.unwrap();

    let records = emitted(coordinator.journal(), remote);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].state, RecordState::Success);
    let snapshot = records[0].input_snapshot.clone().unwrap();
    assert_eq!(snapshot["var"]["seed"], 7.0);
    assert_eq!(emitted(coordinator.journal(), t).len(), 2);
}

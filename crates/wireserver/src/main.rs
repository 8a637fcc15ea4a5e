mod store;
mod ws;

use actix_cors::Cors;
use actix_web::{
    delete, get, post, put, web, App, HttpResponse, HttpServer, Responder,
    Result as ActixResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use store::FlowStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wirecore::{Edge, GraphError, Id, Journal, Node, Value, VarStore};
use wirenodes::{BuiltinFactory, MemoryEndpointStore, ReqwestTransport};
use wireruntime::{
    Coordinator, ExecutorFactory, InProcessWorker, RunOptions, WorkerExecutor,
};
use ws::{serve_run, WsSubscriber};

/// Application state shared across handlers.
struct AppState {
    store: FlowStore,
    journal: Journal,
    factory: Arc<dyn ExecutorFactory>,
}

impl AppState {
    fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.factory.clone(), self.journal.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CreateFlowRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BatchInsertRequest {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    /// Initial flow variables as a JSON object.
    vars: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkerRunRequest {
    node: Node,
    #[serde(default)]
    vars: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct WorkerRunResponse {
    next_node_id: Option<Id>,
    vars: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunMultiRequest {
    flow_id: Id,
    start_node_id: Id,
    stop_node_id: Option<Id>,
    #[serde(default)]
    vars: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn graph_error(e: GraphError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.to_string(),
    };
    match e {
        GraphError::FlowNotFound(_) | GraphError::NodeNotFound(_) => {
            HttpResponse::NotFound().json(body)
        }
        GraphError::StartUndeletable
        | GraphError::MultipleStart
        | GraphError::DuplicateName(_) => HttpResponse::Conflict().json(body),
        _ => HttpResponse::BadRequest().json(body),
    }
}

async fn seed_vars(query: &RunQuery) -> Result<VarStore, HttpResponse> {
    let vars = VarStore::new();
    if let Some(raw) = &query.vars {
        let parsed: BTreeMap<String, Value> = serde_json::from_str(raw).map_err(|e| {
            HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("invalid vars: {e}"),
            })
        })?;
        for (name, value) in parsed {
            vars.set_flow_var(&name, value).await;
        }
    }
    Ok(vars)
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "wireflow"
    }))
}

#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.store.list_flows().await))
}

#[post("/api/flows")]
async fn create_flow(
    data: web::Data<AppState>,
    req: web::Json<CreateFlowRequest>,
) -> ActixResult<impl Responder> {
    let (flow, start) = data.store.create_flow(req.into_inner().name).await;
    info!(flow = %flow.id, name = %flow.name, "flow created");
    Ok(HttpResponse::Created().json(serde_json::json!({
        "flow": flow,
        "start_node": start,
    })))
}

#[get("/api/flows/{id}")]
async fn get_flow(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    match data.store.flow(flow_id).await {
        Some(flow) => {
            let graph = data.store.graph(flow_id).await.map_err(|e| {
                actix_web::error::ErrorInternalServerError(e.to_string())
            })?;
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "flow": flow,
                "nodes": graph.nodes,
                "edges": graph.edges,
            })))
        }
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("flow {} not found", flow_id),
        })),
    }
}

#[delete("/api/flows/{id}")]
async fn delete_flow(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> ActixResult<impl Responder> {
    match data.store.delete_flow(path.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true }))),
        Err(e) => Ok(graph_error(e)),
    }
}

/// Each node's latest effective state plus its latest error as `info`.
#[get("/api/flows/{id}/nodes")]
async fn node_list(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> ActixResult<impl Responder> {
    let graph = match data.store.graph(path.into_inner()).await {
        Ok(graph) => graph,
        Err(e) => return Ok(graph_error(e)),
    };
    let items: Vec<_> = graph
        .nodes
        .iter()
        .map(|node| {
            serde_json::json!({
                "id": node.id,
                "name": node.name,
                "kind": node.kind.label(),
                "state": data.journal.effective_state(node.id),
                "info": data.journal.latest_error(node.id),
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "items": items })))
}

#[post("/api/flows/{id}/nodes")]
async fn create_node(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    node: web::Json<Node>,
) -> ActixResult<impl Responder> {
    let mut node = node.into_inner();
    node.flow_id = path.into_inner();
    match data.store.insert_node(node.clone()).await {
        Ok(()) => Ok(HttpResponse::Created().json(node)),
        Err(e) => Ok(graph_error(e)),
    }
}

#[put("/api/nodes/{id}")]
async fn update_node(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    node: web::Json<Node>,
) -> ActixResult<impl Responder> {
    let mut node = node.into_inner();
    node.id = path.into_inner();
    match data.store.update_node(node.clone()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(node)),
        Err(e) => Ok(graph_error(e)),
    }
}

#[delete("/api/nodes/{id}")]
async fn delete_node(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> ActixResult<impl Responder> {
    match data.store.delete_node(path.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true }))),
        Err(e) => Ok(graph_error(e)),
    }
}

#[post("/api/flows/{id}/edges")]
async fn create_edge(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    edge: web::Json<Edge>,
) -> ActixResult<impl Responder> {
    let mut edge = edge.into_inner();
    edge.flow_id = path.into_inner();
    match data.store.insert_edge(edge.clone()).await {
        Ok(()) => Ok(HttpResponse::Created().json(edge)),
        Err(e) => Ok(graph_error(e)),
    }
}

#[delete("/api/edges/{id}")]
async fn delete_edge(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> ActixResult<impl Responder> {
    match data.store.delete_edge(path.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true }))),
        Err(e) => Ok(graph_error(e)),
    }
}

/// Transactional bulk insert: importers and editor paste.
#[post("/api/flows/{id}/batch")]
async fn batch_insert(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    req: web::Json<BatchInsertRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    match data
        .store
        .batch_insert(path.into_inner(), req.nodes, req.edges)
        .await
    {
        Ok(()) => Ok(HttpResponse::Created().json(serde_json::json!({ "inserted": true }))),
        Err(e) => Ok(graph_error(e)),
    }
}

/// Run a flow, streaming every execution record over the websocket.
#[get("/api/flows/{id}/run")]
async fn flow_run(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<RunQuery>,
) -> ActixResult<HttpResponse> {
    let graph = match data.store.graph(path.into_inner()).await {
        Ok(graph) => graph,
        Err(e) => return Ok(graph_error(e)),
    };
    let vars = match seed_vars(&query).await {
        Ok(vars) => vars,
        Err(resp) => return Ok(resp),
    };

    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;
    info!("flow run client connected");

    let coordinator = data.coordinator();
    let worker = WorkerExecutor::new(data.factory.clone(), data.journal.clone(), graph.clone());
    let cancel = CancellationToken::new();
    let opts = RunOptions {
        worker: Some(Arc::new(InProcessWorker::new(worker))),
        cancel: cancel.clone(),
        ..Default::default()
    };
    let subscriber = Arc::new(WsSubscriber::new(session.clone()));

    actix_web::rt::spawn(async move {
        let run = coordinator.run_flow(&graph, vars, subscriber, opts);
        serve_run(session, msg_stream, cancel, run).await;
        info!("flow run client disconnected");
    });

    Ok(res)
}

/// Run a single node in isolation, streaming its record pair.
#[get("/api/nodes/{id}/run")]
async fn node_run(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<RunQuery>,
) -> ActixResult<HttpResponse> {
    let node_id = path.into_inner();
    let Some(node) = data.store.node(node_id).await else {
        return Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("node {} not found", node_id),
        }));
    };
    let graph = match data.store.graph(node.flow_id).await {
        Ok(graph) => graph,
        Err(e) => return Ok(graph_error(e)),
    };
    let vars = match seed_vars(&query).await {
        Ok(vars) => vars,
        Err(resp) => return Ok(resp),
    };

    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;
    let coordinator = data.coordinator();
    let cancel = CancellationToken::new();
    let opts = RunOptions {
        cancel: cancel.clone(),
        ..Default::default()
    };
    let subscriber = Arc::new(WsSubscriber::new(session.clone()));

    actix_web::rt::spawn(async move {
        let run = coordinator.run_node(&graph, node_id, vars, subscriber, opts);
        serve_run(session, msg_stream, cancel, run).await;
    });

    Ok(res)
}

/// Worker-facing single-node run: execute the supplied node against the
/// supplied variables, return the continuation and the variable delta.
#[post("/api/worker/run")]
async fn worker_run(
    data: web::Data<AppState>,
    req: web::Json<WorkerRunRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    let graph = data
        .store
        .graph(req.node.flow_id)
        .await
        .unwrap_or_default();
    let executor = WorkerExecutor::new(data.factory.clone(), data.journal.clone(), graph);

    match executor.run_single(&req.node, req.vars).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(WorkerRunResponse {
            next_node_id: outcome.next,
            vars: outcome.delta,
        })),
        Err(e) => {
            error!(node = %req.node.name, error = %e, "worker run failed");
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// Worker-facing multi-node run: the client sends one request frame, the
/// server streams records and finishes with the continuation and delta.
#[get("/api/worker/run_multi")]
async fn worker_run_multi(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let data = data.clone();

    actix_web::rt::spawn(async move {
        let request: RunMultiRequest = loop {
            match msg_stream.recv().await {
                Some(Ok(actix_ws::Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(request) => break request,
                    Err(e) => {
                        let _ = session
                            .text(format!(r#"{{"error":"invalid request: {e}"}}"#))
                            .await;
                        let _ = session.close(None).await;
                        return;
                    }
                },
                Some(Ok(actix_ws::Message::Ping(bytes))) => {
                    let _ = session.pong(&bytes).await;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            }
        };

        let graph = match data.store.graph(request.flow_id).await {
            Ok(graph) => graph,
            Err(e) => {
                let _ = session
                    .text(serde_json::json!({ "error": e.to_string() }).to_string())
                    .await;
                let _ = session.close(None).await;
                return;
            }
        };
        let executor = WorkerExecutor::new(data.factory.clone(), data.journal.clone(), graph);
        let subscriber = Arc::new(WsSubscriber::new(session.clone()));

        // a dropped peer fails the subscriber, which cancels the run
        let result = executor
            .run_multi(
                request.start_node_id,
                request.stop_node_id,
                request.vars,
                subscriber,
            )
            .await;

        let outcome = match result {
            Ok(outcome) => serde_json::json!({
                "done": true,
                "next_node_id": outcome.next,
                "vars": outcome.delta,
            }),
            Err(e) => serde_json::json!({ "done": true, "error": e.to_string() }),
        };
        let _ = session.text(outcome.to_string()).await;
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("🚀 Starting wireflow server");

    let endpoints = Arc::new(MemoryEndpointStore::new());
    let factory: Arc<dyn ExecutorFactory> = Arc::new(BuiltinFactory::new(
        endpoints,
        Arc::new(ReqwestTransport::default()),
    ));
    let app_state = web::Data::new(AppState {
        store: FlowStore::new(),
        journal: Journal::new(),
        factory,
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_flows)
            .service(create_flow)
            .service(get_flow)
            .service(delete_flow)
            .service(node_list)
            .service(create_node)
            .service(update_node)
            .service(delete_node)
            .service(create_edge)
            .service(delete_edge)
            .service(batch_insert)
            .service(flow_run)
            .service(node_run)
            .service(worker_run)
            .service(worker_run_multi)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

use crate::endpoint::{EndpointStore, EndpointTemplate, RequestBody, RequestExample};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use wirecore::{expr, Id, Node, NodeError, RequestSpec, Value};
use wireruntime::{NodeExecutor, NodeResult, RunContext};

/// A fully resolved HTTP call, after template overlay and variable
/// interpolation.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub queries: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The wire seam: request nodes never talk to the network directly, so
/// tests can substitute a canned transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, call: HttpCall) -> Result<HttpReply, NodeError>;
}

/// Production transport backed by a pooled reqwest client shared across
/// request nodes in a run.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, call: HttpCall) -> Result<HttpReply, NodeError> {
        let method: reqwest::Method = call
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| NodeError::InvalidArgument(format!("method '{}'", call.method)))?;

        let mut request = self.client.request(method, &call.url);
        if !call.queries.is_empty() {
            request = request.query(&call.queries);
        }
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        request = match call.body {
            RequestBody::None => request,
            RequestBody::Raw(bytes) => request.body(bytes),
            RequestBody::UrlEncoded(pairs) => request.form(&pairs),
            RequestBody::Form(pairs) => {
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in pairs {
                    form = form.text(name, value);
                }
                request.multipart(form)
            }
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::Timeout
            } else {
                NodeError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?
            .to_vec();
        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}

/// Executes the bound endpoint template: overlays the delta template and
/// example, interpolates `{{name.field}}` references, sends, and publishes
/// `response.{status,headers,body}` under the node's name.
pub struct RequestExecutor {
    node: Node,
    spec: RequestSpec,
    store: Arc<dyn EndpointStore>,
    transport: Arc<dyn HttpTransport>,
}

impl RequestExecutor {
    pub fn new(
        node: Node,
        spec: RequestSpec,
        store: Arc<dyn EndpointStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            node,
            spec,
            store,
            transport,
        }
    }

    async fn resolve_call(&self, ctx: &RunContext) -> Result<HttpCall, NodeError> {
        let endpoint_id = self
            .spec
            .endpoint_id
            .ok_or_else(|| NodeError::NotFound("endpoint missing: no endpoint bound".into()))?;
        let mut endpoint = self.store.endpoint(endpoint_id).await?;
        if let Some(delta_id) = self.spec.delta_endpoint_id {
            overlay_endpoint(&mut endpoint, self.store.endpoint(delta_id).await?);
        }

        let mut example = match self.spec.example_id {
            Some(id) => self.store.example(id).await?,
            None => RequestExample::default(),
        };
        if let Some(delta_id) = self.spec.delta_example_id {
            overlay_example(&mut example, self.store.example(delta_id).await?);
        }

        let vars = ctx.vars.snapshot().await;
        Ok(HttpCall {
            method: endpoint.method,
            url: interpolate(&endpoint.url, &vars)?,
            headers: interpolate_pairs(example.headers, &vars)?,
            queries: interpolate_pairs(example.queries, &vars)?,
            body: interpolate_body(example.body, &vars)?,
        })
    }
}

#[async_trait]
impl NodeExecutor for RequestExecutor {
    fn node(&self) -> &Node {
        &self.node
    }

    async fn run(&self, ctx: &RunContext) -> Result<NodeResult, NodeError> {
        let call = self.resolve_call(ctx).await?;
        debug!(node = %self.node.name, method = %call.method, url = %call.url, "sending request");

        let reply = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(NodeError::Canceled),
            reply = self.transport.send(call) => reply?,
        };

        let mut headers = BTreeMap::new();
        let mut json_body = false;
        for (name, value) in &reply.headers {
            if name.eq_ignore_ascii_case("content-type") && value.contains("json") {
                json_body = true;
            }
            headers.insert(name.clone(), Value::String(value.clone()));
        }
        let body = parse_body(&reply.body, json_body);

        let mut response = BTreeMap::new();
        response.insert("status".to_string(), Value::Number(f64::from(reply.status)));
        response.insert("headers".to_string(), Value::Object(headers));
        response.insert("body".to_string(), body);

        Ok(NodeResult::empty()
            .with_output("response", Value::Object(response))
            .with_output_data(json!({ "status": reply.status })))
    }
}

fn parse_body(bytes: &[u8], json_body: bool) -> Value {
    if json_body {
        if let Ok(json) = serde_json::from_slice(bytes) {
            return Value::from_json(json);
        }
    }
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Non-empty delta fields win over the base template.
fn overlay_endpoint(base: &mut EndpointTemplate, delta: EndpointTemplate) {
    if !delta.method.is_empty() {
        base.method = delta.method;
    }
    if !delta.url.is_empty() {
        base.url = delta.url;
    }
}

/// Delta pairs replace same-named base pairs and append the rest; a
/// non-empty delta body replaces the base body.
fn overlay_example(base: &mut RequestExample, delta: RequestExample) {
    overlay_pairs(&mut base.headers, delta.headers);
    overlay_pairs(&mut base.queries, delta.queries);
    if delta.body != RequestBody::None {
        base.body = delta.body;
    }
}

fn overlay_pairs(base: &mut Vec<(String, String)>, delta: Vec<(String, String)>) {
    for (name, value) in delta {
        match base.iter_mut().find(|(n, _)| *n == name) {
            Some(pair) => pair.1 = value,
            None => base.push((name, value)),
        }
    }
}

/// Resolve every `{{path}}` reference in `input` against the variable
/// snapshot. An unresolvable path fails the node.
fn interpolate(input: &str, vars: &expr::Snapshot) -> Result<String, NodeError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);
        let reference = rest[open + 2..open + 2 + close].trim();
        let value = expr::evaluate(reference, vars)
            .map_err(|e| NodeError::NotFound(format!("variable unresolved: {reference}: {e}")))?;
        out.push_str(&value.render());
        rest = &rest[open + 2 + close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn interpolate_pairs(
    pairs: Vec<(String, String)>,
    vars: &expr::Snapshot,
) -> Result<Vec<(String, String)>, NodeError> {
    pairs
        .into_iter()
        .map(|(name, value)| Ok((name, interpolate(&value, vars)?)))
        .collect()
}

fn interpolate_body(body: RequestBody, vars: &expr::Snapshot) -> Result<RequestBody, NodeError> {
    Ok(match body {
        RequestBody::None => RequestBody::None,
        RequestBody::Raw(bytes) => match String::from_utf8(bytes) {
            Ok(text) => RequestBody::Raw(interpolate(&text, vars)?.into_bytes()),
            // Binary bodies pass through untouched.
            Err(e) => RequestBody::Raw(e.into_bytes()),
        },
        RequestBody::Form(pairs) => RequestBody::Form(interpolate_pairs(pairs, vars)?),
        RequestBody::UrlEncoded(pairs) => RequestBody::UrlEncoded(interpolate_pairs(pairs, vars)?),
    })
}

/// Convenience for tests and the CLI: bind a fresh endpoint into `store`
/// and return a spec referencing it.
pub fn bind_endpoint(
    store: &crate::endpoint::MemoryEndpointStore,
    method: &str,
    url: &str,
) -> RequestSpec {
    let endpoint = EndpointTemplate {
        id: Id::now(),
        method: method.to_string(),
        url: url.to_string(),
    };
    let spec = RequestSpec {
        endpoint_id: Some(endpoint.id),
        ..Default::default()
    };
    store.insert_endpoint(endpoint);
    spec
}

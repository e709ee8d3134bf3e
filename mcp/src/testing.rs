//! In-process SSE MCP server for integration tests.
//!
//! Available on the `test-server` feature. The server speaks just enough of MCP
//! `2024-11-05` over SSE to drive [`McpClient`](crate::McpClient) end to end, and exposes
//! switches for the awkward cases: answering inline vs. over the stream, never answering a
//! method, answering a method late, omitting the `tools/list` result, refusing new event
//! streams, or dropping the live one. Request headers are recorded for inspection.
//!
//! Every tool answers `tools/call` with two text blocks around an image block: the first
//! text is `"<label>:<tool>"`, the second is the JSON of the arguments. A tool named
//! `fail` answers with `isError: true`. An integer `delay_ms` argument postpones the
//! answer, which lets tests force out-of-order responses.

use crate::jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
use crate::types::McpTool;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// How `POST`ed requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// JSON-RPC response in the POST body.
    Inline,
    /// `202 Accepted` and the response as a `message` event.
    Stream,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ServerState {
    label: String,
    tools: Vec<McpTool>,
    reply_mode: Mutex<ReplyMode>,
    silent_methods: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    omit_tools_result: AtomicBool,
    send_endpoint: AtomicBool,
    refuse_streams: AtomicBool,
    session: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    stream_count: AtomicUsize,
    methods: Mutex<Vec<String>>,
    tool_calls: Mutex<Vec<(String, Value)>>,
    stream_headers: Mutex<Vec<HeaderMap>>,
    post_headers: Mutex<Vec<HeaderMap>>,
}

impl ServerState {
    fn respond(&self, message: &JsonRpcMessage, id: u64) -> JsonRpcResponse {
        let method = message.method.as_deref().unwrap_or_default();
        match method {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": crate::PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.label, "version": "0.0.1"}
                }),
            ),
            "tools/list" => {
                if self.omit_tools_result.load(Ordering::SeqCst) {
                    JsonRpcResponse {
                        jsonrpc: "2.0".to_string(),
                        id,
                        result: None,
                        error: None,
                    }
                } else {
                    JsonRpcResponse::success(id, json!({ "tools": self.tools }))
                }
            }
            "tools/call" => {
                let params = message.params.clone().unwrap_or(Value::Null);
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                lock(&self.tool_calls).push((name.clone(), arguments.clone()));

                if !self.tools.iter().any(|tool| tool.name == name) {
                    return JsonRpcResponse::failure(
                        id,
                        JsonRpcError {
                            code: -32602,
                            message: format!("Unknown tool: {}", name),
                            data: None,
                        },
                    );
                }
                JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [
                            {"type": "text", "text": format!("{}:{}", self.label, name)},
                            {"type": "image", "data": "iVBORw0KGgo=", "mimeType": "image/png"},
                            {"type": "text", "text": arguments.to_string()}
                        ],
                        "isError": name == "fail"
                    }),
                )
            }
            other => JsonRpcResponse::failure(
                id,
                JsonRpcError {
                    code: -32601,
                    message: format!("Method not found: {}", other),
                    data: None,
                },
            ),
        }
    }

    fn push(&self, response: &JsonRpcResponse) {
        let data = match serde_json::to_string(response) {
            Ok(data) => data,
            Err(_) => return,
        };
        if let Some(session) = lock(&self.session).as_ref() {
            let _ = session.send(Event::default().event("message").data(data));
        }
    }
}

/// Builder for [`FakeMcpServer`].
pub struct FakeMcpServerBuilder {
    label: String,
    tools: Vec<McpTool>,
    reply_mode: ReplyMode,
}

impl FakeMcpServerBuilder {
    pub fn tool(mut self, name: &str, description: &str) -> Self {
        self.tools.push(McpTool {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: Some(json!({"type": "object", "properties": {}})),
        });
        self
    }

    pub fn reply_mode(mut self, mode: ReplyMode) -> Self {
        self.reply_mode = mode;
        self
    }

    pub async fn start(self) -> std::io::Result<FakeMcpServer> {
        let state = Arc::new(ServerState {
            label: self.label,
            tools: self.tools,
            reply_mode: Mutex::new(self.reply_mode),
            silent_methods: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            omit_tools_result: AtomicBool::new(false),
            send_endpoint: AtomicBool::new(true),
            refuse_streams: AtomicBool::new(false),
            session: Mutex::new(None),
            stream_count: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
            tool_calls: Mutex::new(Vec::new()),
            stream_headers: Mutex::new(Vec::new()),
            post_headers: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/sse", get(sse_handler))
            .route("/message", post(message_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(FakeMcpServer { addr, state, task })
    }
}

/// Running fake server; shut down when dropped.
pub struct FakeMcpServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl FakeMcpServer {
    /// Start configuring a server whose tool results are tagged with `label`.
    pub fn builder(label: &str) -> FakeMcpServerBuilder {
        FakeMcpServerBuilder {
            label: label.to_string(),
            tools: Vec::new(),
            reply_mode: ReplyMode::Stream,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL of the event stream, suitable for `McpServerConfig::url`.
    pub fn sse_url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        *lock(&self.state.reply_mode) = mode;
    }

    /// Requests for `method` are accepted but never answered.
    pub fn silence(&self, method: &str) {
        lock(&self.state.silent_methods).insert(method.to_string());
    }

    /// Requests for `method` are answered only after `delay`.
    pub fn delay(&self, method: &str, delay: Duration) {
        lock(&self.state.delays).insert(method.to_string(), delay);
    }

    pub fn omit_tools_result(&self, omit: bool) {
        self.state.omit_tools_result.store(omit, Ordering::SeqCst);
    }

    /// Open event streams without ever sending the `endpoint` event.
    pub fn withhold_endpoint(&self, withhold: bool) {
        self.state.send_endpoint.store(!withhold, Ordering::SeqCst);
    }

    /// Answer new event-stream requests with `503`.
    pub fn refuse_streams(&self, refuse: bool) {
        self.state.refuse_streams.store(refuse, Ordering::SeqCst);
    }

    /// Close the live event stream from the server side.
    pub fn drop_stream(&self) {
        lock(&self.state.session).take();
    }

    /// Number of event-stream requests received so far.
    pub fn stream_count(&self) -> usize {
        self.state.stream_count.load(Ordering::SeqCst)
    }

    /// Methods of every POSTed request and notification, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        lock(&self.state.methods).clone()
    }

    /// Headers of every event-stream request, in arrival order.
    pub fn stream_headers(&self) -> Vec<HeaderMap> {
        lock(&self.state.stream_headers).clone()
    }

    /// Headers of every POST, in arrival order.
    pub fn post_headers(&self) -> Vec<HeaderMap> {
        lock(&self.state.post_headers).clone()
    }

    /// `(tool name, arguments)` of every `tools/call` received.
    pub fn tool_calls(&self) -> Vec<(String, Value)> {
        lock(&self.state.tool_calls).clone()
    }

    /// Send a raw `message` event on the live stream.
    pub fn push_raw(&self, data: &str) {
        if let Some(session) = lock(&self.state.session).as_ref() {
            let _ = session.send(Event::default().event("message").data(data.to_string()));
        }
    }
}

impl Drop for FakeMcpServer {
    fn drop(&mut self) {
        lock(&self.state.session).take();
        self.task.abort();
    }
}

async fn sse_handler(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    state.stream_count.fetch_add(1, Ordering::SeqCst);
    lock(&state.stream_headers).push(headers);
    if state.refuse_streams.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    if state.send_endpoint.load(Ordering::SeqCst) {
        let _ = tx.send(
            Event::default()
                .event("endpoint")
                .data("/message?sessionId=1"),
        );
    }
    *lock(&state.session) = Some(tx);

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    Sse::new(stream).into_response()
}

async fn message_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    lock(&state.post_headers).push(headers);
    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(message) => message,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let method = match message.method.clone() {
        Some(method) => method,
        // a response from the client (e.g. a ping reply)
        None => return StatusCode::ACCEPTED.into_response(),
    };
    lock(&state.methods).push(method.clone());

    let id = match message.numeric_id() {
        Some(id) => id,
        None => return StatusCode::ACCEPTED.into_response(),
    };
    if lock(&state.silent_methods).contains(&method) {
        return StatusCode::ACCEPTED.into_response();
    }
    let delay = lock(&state.delays).get(&method).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let response = state.respond(&message, id);
    let mode = *lock(&state.reply_mode);
    match mode {
        ReplyMode::Inline => Json(response).into_response(),
        ReplyMode::Stream => {
            let delay = message
                .params
                .as_ref()
                .and_then(|params| params.get("arguments"))
                .and_then(|arguments| arguments.get("delay_ms"))
                .and_then(Value::as_u64);
            match delay {
                Some(delay) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        state.push(&response);
                    });
                }
                None => state.push(&response),
            }
            (StatusCode::ACCEPTED, "Accepted").into_response()
        }
    }
}

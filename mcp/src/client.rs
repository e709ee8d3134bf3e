//! Per-server MCP protocol engine.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──endpoint event──▶ Initializing ─tools/list─▶ Connected
//!      ▲                          │                              │                        │
//!      └──────────── failure / disconnect() / event stream lost ─┴────────────────────────┘
//! ```
//!
//! `connect()` spawns one background task that holds the long-lived `GET` event stream and
//! dispatches its events. The first `endpoint` event tells the client where to `POST`
//! JSON-RPC bodies. Every request gets a fresh id and a single-use [`oneshot`] slot in the
//! pending table; the slot is filled either straight from the POST response body (when the
//! server answers inline) or by the stream task when a `message` event with the same id
//! arrives.
//!
//! Nothing reconnects in the background. The only automatic reconnect happens inside
//! [`McpClient::call_tool`]: one teardown, one fresh connect, one retry. Concurrent callers
//! share that reconnect instead of racing each other's transports.
//!
//! Every state change is published on a [`watch`] channel, see
//! [`McpClient::subscribe_state`].

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::sse::{SseEvent, SseParser};
use crate::types::{
    CallToolResult, ConnectionState, Implementation, InitializeResult, McpServerConfig,
    McpServerStatus, McpTool, PROTOCOL_VERSION,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Upper bound on `nextCursor` pages followed during tool discovery.
const MAX_TOOL_PAGES: usize = 32;

/// Tunables for one client.
#[derive(Debug, Clone)]
pub struct McpClientOptions {
    /// How long `connect()` waits for the `endpoint` event.
    pub endpoint_timeout: Duration,
    /// Round-trip bound for every JSON-RPC request.
    pub request_timeout: Duration,
    pub protocol_version: String,
    pub client_info: Implementation,
}

impl Default for McpClientOptions {
    fn default() -> Self {
        Self {
            endpoint_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: Implementation {
                name: "petagent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

type PendingSlot = oneshot::Sender<Result<JsonRpcResponse, McpError>>;

struct Inner {
    state: ConnectionState,
    endpoint: Option<String>,
    tools: Vec<McpTool>,
    server_info: Option<InitializeResult>,
    last_error: Option<String>,
    last_connected: Option<DateTime<Utc>>,
    stream_task: Option<JoinHandle<()>>,
}

/// State shared between the client handle and its stream task.
struct Shared {
    name: String,
    inner: Mutex<Inner>,
    pending: Mutex<HashMap<u64, PendingSlot>>,
    next_id: AtomicU64,
    /// Bumped on every connect and every teardown. Work started under an older value must
    /// not touch the current connection.
    generation: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Run `change` only while `generation` is still the live connection attempt.
    fn update_current<R>(
        &self,
        generation: u64,
        change: impl FnOnce(&mut Inner) -> R,
    ) -> Option<R> {
        let mut inner = lock(&self.inner);
        if !self.is_current(generation) || inner.state == ConnectionState::Disconnected {
            return None;
        }
        Some(change(&mut inner))
    }

    fn register(&self, id: u64, slot: PendingSlot) {
        lock(&self.pending).insert(id, slot);
    }

    fn forget(&self, id: u64) {
        lock(&self.pending).remove(&id);
    }

    fn complete(&self, response: JsonRpcResponse) {
        let slot = lock(&self.pending).remove(&response.id);
        match slot {
            Some(slot) => {
                let _ = slot.send(Ok(response));
            }
            None => debug!(
                "mcp::McpClient[{}]: response for unknown or settled request {}",
                self.name, response.id
            ),
        }
    }

    fn fail_pending(&self) -> usize {
        let drained: Vec<PendingSlot> = lock(&self.pending).drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(McpError::Disconnected));
        }
        count
    }

    /// Cancel the stream task, forget the endpoint, fail pending requests, drop tools.
    fn teardown(&self) -> usize {
        let task = {
            let mut inner = lock(&self.inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.set_state(&mut inner, ConnectionState::Disconnected);
            inner.endpoint = None;
            inner.tools.clear();
            inner.server_info = None;
            inner.stream_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.fail_pending()
    }

    fn stream_lost(&self, generation: u64, reason: String) {
        if !self.is_current(generation) {
            return;
        }
        {
            let mut inner = lock(&self.inner);
            if inner.state == ConnectionState::Disconnected {
                return;
            }
            warn!("mcp::McpClient[{}]: {}", self.name, reason);
            inner.endpoint = None;
            inner.tools.clear();
            inner.last_error = Some(reason);
            self.set_state(&mut inner, ConnectionState::Disconnected);
            // the handle belongs to the task that is finishing right now
            inner.stream_task = None;
        }
        self.fail_pending();
    }
}

/// Client for one remote MCP server.
///
/// Cheap accessors (`state`, `status`, `tools`) never block on the network; every network
/// operation is `async` and bounded by the timeouts in [`McpClientOptions`].
pub struct McpClient {
    config: McpServerConfig,
    options: McpClientOptions,
    http: reqwest::Client,
    shared: Arc<Shared>,
    /// Serializes the reconnect inside `call_tool`.
    reconnect: tokio::sync::Mutex<()>,
}

impl McpClient {
    /// Create a disconnected client. Fails only if the HTTP client cannot be built.
    pub fn new(config: McpServerConfig, options: McpClientOptions) -> Result<Self, McpError> {
        // no overall timeout here: the event stream is long-lived
        let http = reqwest::Client::builder()
            .connect_timeout(options.endpoint_timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|err| McpError::Transport(err.to_string()))?;
        Ok(Self::with_http_client(config, options, http))
    }

    /// Create a client around an existing `reqwest::Client`.
    pub fn with_http_client(
        config: McpServerConfig,
        options: McpClientOptions,
        http: reqwest::Client,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                endpoint: None,
                tools: Vec::new(),
                server_info: None,
                last_error: None,
                last_connected: None,
                stream_task: None,
            }),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            state_tx: watch::channel(ConnectionState::Disconnected).0,
        });
        Self {
            config,
            options,
            http,
            shared,
            reconnect: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.inner).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that sees every state change, including a lost event stream.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// POST target announced by the server, once known.
    pub fn endpoint(&self) -> Option<String> {
        lock(&self.shared.inner).endpoint.clone()
    }

    /// Tools discovered by the last successful connect.
    pub fn tools(&self) -> Vec<McpTool> {
        lock(&self.shared.inner).tools.clone()
    }

    pub fn server_info(&self) -> Option<InitializeResult> {
        lock(&self.shared.inner).server_info.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.inner).last_error.clone()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub fn status(&self) -> McpServerStatus {
        let inner = lock(&self.shared.inner);
        McpServerStatus {
            connected: inner.state == ConnectionState::Connected,
            tool_count: inner.tools.len(),
            last_error: inner.last_error.clone(),
            last_connected: inner.last_connected,
        }
    }

    /// Run the full connect sequence: event stream, endpoint, `initialize`,
    /// `notifications/initialized`, `tools/list`.
    ///
    /// Any existing connection is torn down first. On failure the client is left
    /// disconnected and the error is both recorded (see [`McpClient::status`]) and returned.
    /// A [`disconnect`](Self::disconnect) (or a newer `connect`) that lands while this one
    /// is still running wins: this call then fails with [`McpError::Disconnected`].
    pub async fn connect(&self) -> Result<(), McpError> {
        let generation = {
            self.shared.teardown();
            let mut inner = lock(&self.shared.inner);
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.set_state(&mut inner, ConnectionState::Connecting);
            generation
        };
        info!(
            "mcp::McpClient[{}]: connecting to {}",
            self.config.name, self.config.url
        );

        let outcome = match self.establish(generation).await {
            Ok(tools) => self
                .shared
                .update_current(generation, |inner| {
                    let count = tools.len();
                    inner.tools = tools;
                    inner.last_error = None;
                    inner.last_connected = Some(Utc::now());
                    self.shared.set_state(inner, ConnectionState::Connected);
                    count
                })
                .ok_or(McpError::Disconnected),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(tool_count) => {
                info!(
                    "mcp::McpClient[{}]: connected, {} tool(s) available",
                    self.config.name, tool_count
                );
                Ok(())
            }
            Err(err) if !self.shared.is_current(generation) => {
                debug!(
                    "mcp::McpClient[{}]: connect superseded ({})",
                    self.config.name, err
                );
                Err(McpError::Disconnected)
            }
            Err(err) => {
                lock(&self.shared.inner).last_error = Some(err.to_string());
                self.shared.teardown();
                warn!(
                    "mcp::McpClient[{}]: connect failed: {}",
                    self.config.name, err
                );
                Err(err)
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<Vec<McpTool>, McpError> {
        let server_url = Url::parse(&self.config.url)
            .map_err(|err| McpError::InvalidUrl(format!("{}: {}", self.config.url, err)))?;

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_stream(
            self.http.clone(),
            self.config.clone(),
            self.options.request_timeout,
            server_url,
            Arc::clone(&self.shared),
            generation,
            endpoint_tx,
        ));
        {
            let mut inner = lock(&self.shared.inner);
            let live = self.shared.is_current(generation)
                && inner.state != ConnectionState::Disconnected;
            if !live {
                task.abort();
                return Err(McpError::Disconnected);
            }
            inner.stream_task = Some(task);
        }

        match tokio::time::timeout(self.options.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => {
                debug!(
                    "mcp::McpClient[{}]: message endpoint {}",
                    self.config.name, endpoint
                );
            }
            Ok(Ok(Err(err))) => return Err(err),
            Ok(Err(_)) => {
                return Err(McpError::Transport(
                    "event stream ended before the endpoint event".to_string(),
                ))
            }
            Err(_) => {
                return Err(McpError::Timeout(format!(
                    "no endpoint event within {:?}",
                    self.options.endpoint_timeout
                )))
            }
        }

        self.shared
            .update_current(generation, |inner| {
                self.shared.set_state(inner, ConnectionState::Initializing)
            })
            .ok_or(McpError::Disconnected)?;

        let init = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": self.options.protocol_version,
                    "capabilities": {},
                    "clientInfo": self.options.client_info,
                })),
            )
            .await?;
        if let Some(error) = init.error {
            return Err(error.into());
        }
        if let Some(result) = init.result {
            match serde_json::from_value::<InitializeResult>(result) {
                Ok(info) => {
                    if let Some(server) = &info.server_info {
                        debug!(
                            "mcp::McpClient[{}]: server {} {}",
                            self.config.name, server.name, server.version
                        );
                    }
                    self.shared.update_current(generation, |inner| {
                        inner.server_info = Some(info);
                    });
                }
                Err(err) => debug!(
                    "mcp::McpClient[{}]: unreadable initialize result: {}",
                    self.config.name, err
                ),
            }
        }

        self.notify("notifications/initialized", None).await?;

        self.list_tools().await
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let response = self.request("tools/list", params).await?;
            if let Some(error) = response.error {
                return Err(error.into());
            }
            let result = match response.result {
                Some(result) => result,
                None => break,
            };
            if let Some(listed) = result.get("tools") {
                let page: Vec<McpTool> = serde_json::from_value(listed.clone())?;
                tools.extend(page);
            }
            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Tear the connection down.
    ///
    /// Cancels the stream task, forgets the endpoint, fails every pending request with
    /// [`McpError::Disconnected`] and discards the discovered tools.
    pub fn disconnect(&self) {
        let failed = self.shared.teardown();
        info!(
            "mcp::McpClient[{}]: disconnected ({} pending request(s) failed)",
            self.config.name, failed
        );
    }

    /// Send a request and wait for its correlated response.
    ///
    /// JSON-RPC error objects are returned inside the response, not as `Err`; transport
    /// failures and timeouts are `Err`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let endpoint = self.endpoint().ok_or(McpError::NotConnected)?;
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.register(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        debug!(
            "mcp::McpClient[{}]: -> {} (id {})",
            self.config.name, method, id
        );
        let body = match self.post(&endpoint, &request).await {
            Ok(body) => body,
            Err(err) => {
                self.shared.forget(id);
                return Err(err);
            }
        };

        if let Some(response) = inline_response(&body, id) {
            self.shared.forget(id);
            return Ok(response);
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Disconnected),
            Err(_) => {
                self.shared.forget(id);
                Err(McpError::Timeout(format!(
                    "{} (id {}) got no response within {:?}",
                    method, id, self.options.request_timeout
                )))
            }
        }
    }

    /// Send a notification; nothing is registered and nothing is awaited beyond the POST.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let endpoint = self.endpoint().ok_or(McpError::NotConnected)?;
        let notification = JsonRpcRequest::notification(method, params);
        self.post(&endpoint, &notification).await.map(|_| ())
    }

    async fn post(&self, endpoint: &str, body: &JsonRpcRequest) -> Result<String, McpError> {
        post_json(
            &self.http,
            endpoint,
            &self.config,
            self.options.request_timeout,
            body,
        )
        .await
    }

    /// One `tools/call` round trip without any recovery.
    pub async fn try_call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let response = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        if let Some(error) = response.error {
            return Err(error.into());
        }
        match response.result {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Ok(CallToolResult::default()),
        }
    }

    /// Invoke a remote tool.
    ///
    /// If the call fails and the client turns out to be disconnected, the client performs a
    /// single disconnect + reconnect + retry. Whatever happens, the outcome is a
    /// [`CallToolResult`]; errors are reported with `is_error = true`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        let first = match self.try_call_tool(name, arguments.clone()).await {
            Ok(result) => return result,
            Err(err) => err,
        };

        if self.is_connected() {
            warn!(
                "mcp::McpClient[{}]: tool '{}' failed: {}",
                self.config.name, name, first
            );
            return CallToolResult::error(first.to_string());
        }

        {
            let _reconnecting = self.reconnect.lock().await;
            // another caller may have restored the connection while we waited
            if !self.is_connected() {
                warn!(
                    "mcp::McpClient[{}]: tool '{}' failed while disconnected ({}), reconnecting",
                    self.config.name, name, first
                );
                self.disconnect();
                if let Err(err) = self.connect().await {
                    return CallToolResult::error(format!("Reconnect failed: {}", err));
                }
            }
        }
        match self.try_call_tool(name, arguments).await {
            Ok(result) => result,
            Err(err) => CallToolResult::error(err.to_string()),
        }
    }

}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

/// Resolve the `endpoint` event payload against the server URL.
///
/// Absolute URLs are taken as is. Anything else is a path on the server's origin
/// (scheme + host + port), regardless of the path of the SSE URL.
pub fn resolve_endpoint(server_url: &Url, data: &str) -> Result<String, McpError> {
    let data = data.trim();
    if data.is_empty() {
        return Err(McpError::Protocol("empty endpoint event".to_string()));
    }
    if data.starts_with("http://") || data.starts_with("https://") {
        return Url::parse(data)
            .map(String::from)
            .map_err(|err| McpError::InvalidUrl(format!("{}: {}", data, err)));
    }

    let origin = server_url.origin();
    if !origin.is_tuple() {
        return Err(McpError::InvalidUrl(server_url.to_string()));
    }
    if data.starts_with('/') {
        Ok(format!("{}{}", origin.ascii_serialization(), data))
    } else {
        Ok(format!("{}/{}", origin.ascii_serialization(), data))
    }
}

fn header_map(config: &McpServerConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(
                "mcp::McpClient[{}]: skipping invalid header '{}'",
                config.name, key
            ),
        }
    }
    headers
}

fn inline_response(body: &str, id: u64) -> Option<JsonRpcResponse> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    JsonRpcMessage::parse(body)
        .ok()
        .and_then(JsonRpcMessage::into_response)
        .filter(|response| response.id == id)
}

async fn post_json(
    http: &reqwest::Client,
    endpoint: &str,
    config: &McpServerConfig,
    timeout: Duration,
    body: &JsonRpcRequest,
) -> Result<String, McpError> {
    let response = http
        .post(endpoint)
        .headers(header_map(config))
        .timeout(timeout)
        .json(body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(McpError::HttpStatus(status.as_u16()));
    }
    Ok(response.text().await?)
}

async fn run_event_stream(
    http: reqwest::Client,
    config: McpServerConfig,
    request_timeout: Duration,
    server_url: Url,
    shared: Arc<Shared>,
    generation: u64,
    endpoint_tx: oneshot::Sender<Result<String, McpError>>,
) {
    let mut endpoint_tx = Some(endpoint_tx);

    let response = match http
        .get(server_url.clone())
        .header(ACCEPT, "text/event-stream")
        .headers(header_map(&config))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            let err = McpError::HttpStatus(response.status().as_u16());
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(Err(err));
            }
            return;
        }
        Err(err) => {
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(Err(err.into()));
            }
            return;
        }
    };

    let mut parser = SseParser::new();
    let mut body = Box::pin(response.bytes_stream());
    let reason = loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                for event in parser.feed(&chunk) {
                    dispatch_event(
                        &http,
                        &config,
                        request_timeout,
                        &server_url,
                        &shared,
                        generation,
                        &mut endpoint_tx,
                        event,
                    );
                }
            }
            Some(Err(err)) => break format!("event stream error: {}", err),
            None => break "event stream closed by server".to_string(),
        }
    };

    if let Some(tx) = endpoint_tx.take() {
        let _ = tx.send(Err(McpError::Transport(reason.clone())));
    }
    shared.stream_lost(generation, reason);
}

#[allow(clippy::too_many_arguments)]
fn dispatch_event(
    http: &reqwest::Client,
    config: &McpServerConfig,
    request_timeout: Duration,
    server_url: &Url,
    shared: &Arc<Shared>,
    generation: u64,
    endpoint_tx: &mut Option<oneshot::Sender<Result<String, McpError>>>,
    event: SseEvent,
) {
    match event.event.as_str() {
        "endpoint" => {
            let resolved = resolve_endpoint(server_url, &event.data);
            if let Ok(endpoint) = &resolved {
                shared.update_current(generation, |inner| {
                    inner.endpoint = Some(endpoint.clone());
                });
            }
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(resolved);
            }
        }
        "message" => {
            let message = match JsonRpcMessage::parse(&event.data) {
                Ok(message) => message,
                Err(err) => {
                    warn!(
                        "mcp::McpClient[{}]: malformed message event: {}",
                        shared.name, err
                    );
                    return;
                }
            };
            if message.is_server_message() {
                handle_server_message(http, config, request_timeout, shared, message);
            } else if let Some(response) = message.into_response() {
                shared.complete(response);
            }
        }
        other => debug!(
            "mcp::McpClient[{}]: ignoring '{}' event",
            shared.name, other
        ),
    }
}

fn handle_server_message(
    http: &reqwest::Client,
    config: &McpServerConfig,
    request_timeout: Duration,
    shared: &Arc<Shared>,
    message: JsonRpcMessage,
) {
    let method = message.method.clone().unwrap_or_default();
    match (method.as_str(), message.numeric_id()) {
        ("ping", Some(id)) => {
            let endpoint = match lock(&shared.inner).endpoint.clone() {
                Some(endpoint) => endpoint,
                None => return,
            };
            let http = http.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let pong = JsonRpcResponse::success(id, json!({}));
                let result = http
                    .post(&endpoint)
                    .headers(header_map(&config))
                    .timeout(request_timeout)
                    .json(&pong)
                    .send()
                    .await;
                if let Err(err) = result {
                    debug!("mcp::McpClient[{}]: ping reply failed: {}", config.name, err);
                }
            });
        }
        _ => debug!(
            "mcp::McpClient[{}]: server message '{}'",
            shared.name, method
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_relative_endpoint_resolves_against_origin() {
        let resolved = resolve_endpoint(&url("http://h:3001/sse"), "/msg?sid=1").unwrap();
        assert_eq!(resolved, "http://h:3001/msg?sid=1");

        let nested = resolve_endpoint(&url("https://h/a/b/sse"), "messages?id=2").unwrap();
        assert_eq!(nested, "https://h/messages?id=2");
    }

    #[test]
    fn test_absolute_endpoint_is_kept() {
        let resolved =
            resolve_endpoint(&url("http://h:3001/sse"), "http://other:9/post?x=1").unwrap();
        assert_eq!(resolved, "http://other:9/post?x=1");
    }

    #[test]
    fn test_empty_endpoint_is_protocol_error() {
        let err = resolve_endpoint(&url("http://h:3001/sse"), "  ").unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[test]
    fn test_inline_response_requires_matching_id() {
        let body = r#"{"jsonrpc":"2.0","id":4,"result":{}}"#;
        assert!(inline_response(body, 4).is_some());
        assert!(inline_response(body, 5).is_none());
        assert!(inline_response("Accepted", 4).is_none());
        assert!(inline_response("", 4).is_none());
    }

    #[tokio::test]
    async fn test_request_without_endpoint_is_not_connected() {
        let client = McpClient::new(
            McpServerConfig::new("idle", "http://127.0.0.1:1/sse"),
            McpClientOptions::default(),
        )
        .unwrap();
        let err = client.request("tools/list", None).await.unwrap_err();
        assert_eq!(err, McpError::NotConnected);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_every_pending_request() {
        let client = McpClient::new(
            McpServerConfig::new("pending", "http://127.0.0.1:1/sse"),
            McpClientOptions::default(),
        )
        .unwrap();

        let mut receivers = Vec::new();
        for id in 100..103 {
            let (tx, rx) = oneshot::channel();
            client.shared.register(id, tx);
            receivers.push(rx);
        }
        assert_eq!(client.pending_requests(), 3);

        client.disconnect();

        assert_eq!(client.pending_requests(), 0);
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), Err(McpError::Disconnected));
        }
    }

    #[tokio::test]
    async fn test_responses_complete_only_their_own_id() {
        let client = McpClient::new(
            McpServerConfig::new("ids", "http://127.0.0.1:1/sse"),
            McpClientOptions::default(),
        )
        .unwrap();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        client.shared.register(1, tx1);
        client.shared.register(2, tx2);

        client
            .shared
            .complete(JsonRpcResponse::success(2, json!("second")));
        client
            .shared
            .complete(JsonRpcResponse::success(1, json!("first")));

        assert_eq!(rx1.await.unwrap().unwrap().result, Some(json!("first")));
        assert_eq!(rx2.await.unwrap().unwrap().result, Some(json!("second")));
    }
}

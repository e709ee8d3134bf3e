//! OpenAI-compatible chat provider (`POST {baseUrl}/chat/completions`).
//!
//! Works against api.openai.com and any endpoint speaking the same dialect (local
//! gateways, proxies). Tools are sent as native function definitions, and streaming uses
//! the vendor's SSE format: content deltas are forwarded as they arrive, tool-call deltas
//! are accumulated and delivered with the final [`ChatStreamEvent::Done`].
//!
//! # Example
//!
//! ```rust,no_run
//! use petagent::clients::openai::OpenAiProvider;
//! use petagent::provider::{ChatMessage, ChatRequest, LlmProvider, Provider, ProviderConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = OpenAiProvider::new(
//!     ProviderConfig::new("openai").with_api_key(std::env::var("OPENAI_API_KEY")?),
//! );
//! provider.initialize().await?;
//! let reply = provider
//!     .chat(ChatRequest::new(vec![ChatMessage::user("Say hi to my cat")]))
//!     .await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

use crate::clients::common::{check_models, check_status, HttpSlot};
use crate::http_client::join_url;
use crate::provider::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatStream, ChatStreamEvent, ConfigField,
    ConfigFieldType, LlmProvider, Provider, ProviderConfig, ProviderError, ProviderMetadata,
    ProviderTestResult, TokenUsage, ToolCall, KEY_API_KEY, KEY_BASE_URL, KEY_MODEL, KEY_PROXY,
    KEY_TIMEOUT,
};
use crate::tool_protocol::ToolDefinition;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use mcp::sse::SseParser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;

pub const PROVIDER_ID: &str = "openai";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub fn metadata() -> ProviderMetadata {
    ProviderMetadata::new(
        PROVIDER_ID,
        "OpenAI",
        "OpenAI Chat Completions or any compatible endpoint",
    )
    .with_field(ConfigField::new(KEY_API_KEY, "API key", ConfigFieldType::Password).required())
    .with_field(
        ConfigField::new(KEY_BASE_URL, "Base URL", ConfigFieldType::String)
            .with_default(DEFAULT_BASE_URL),
    )
    .with_field(
        ConfigField::new(KEY_MODEL, "Model", ConfigFieldType::String)
            .with_default(DEFAULT_MODEL),
    )
    .with_field(
        ConfigField::new("temperature", "Temperature", ConfigFieldType::Number)
            .with_default("0.7"),
    )
    .with_field(
        ConfigField::new(KEY_TIMEOUT, "Timeout (s)", ConfigFieldType::Number)
            .with_default("60"),
    )
    .with_field(ConfigField::new(KEY_PROXY, "Proxy", ConfigFieldType::String))
}

pub struct OpenAiProvider {
    metadata: ProviderMetadata,
    config: ProviderConfig,
    http: HttpSlot,
}

impl OpenAiProvider {
    /// Build a provider; unset values take the defaults from [`metadata`].
    pub fn new(config: ProviderConfig) -> Self {
        let metadata = metadata();
        Self {
            config: config.with_defaults(&metadata),
            metadata,
            http: HttpSlot::new(),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .get(KEY_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn model(&self) -> String {
        self.config
            .get(KEY_MODEL)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model(),
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(wire_tool).collect());
        }
        let temperature = request.temperature.map(f64::from).or_else(|| {
            self.config
                .get("temperature")
                .and_then(|t| t.parse::<f64>().ok())
        });
        if let Some(temperature) = temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn post_chat(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.config.require(KEY_API_KEY)?;
        let client = self.http.client(&self.config)?;
        let response = client
            .post(join_url(&self.base_url(), "chat/completions"))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::System => json!({"role": "system", "content": message.content}),
        ChatRole::User => json!({"role": "user", "content": message.content}),
        ChatRole::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments.to_string()},
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        ChatRole::Assistant => json!({"role": "assistant", "content": message.content}),
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
    }
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool
                .parameters
                .clone()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        }
    })
}

/// Function-call arguments arrive as a JSON *string*; keep the raw text if it isn't JSON.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Clone, Copy)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

fn parse_completion(completion: Completion) -> Result<ChatResponse, ProviderError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response has no choices".to_string()))?;
    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect(),
        usage: completion.usage.map(TokenUsage::from),
        finish_reason: choice.finish_reason,
    })
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream chunks into the final response.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

impl StreamAccumulator {
    /// Apply one chunk; returns the text delta it carried, if any.
    fn apply(&mut self, chunk: StreamChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }
        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        if text.is_empty() {
            return None;
        }
        self.content.push_str(&text);
        Some(text)
    }

    fn into_response(self) -> ChatResponse {
        ChatResponse {
            content: self.content,
            tool_calls: self
                .calls
                .into_values()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
                .collect(),
            usage: self.usage,
            finish_reason: self.finish_reason,
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

struct StreamState {
    body: ByteStream,
    parser: SseParser,
    queue: VecDeque<Result<ChatStreamEvent, ProviderError>>,
    acc: Option<StreamAccumulator>,
}

impl StreamState {
    fn finished(&self) -> bool {
        self.acc.is_none()
    }

    fn finish(&mut self) {
        if let Some(acc) = self.acc.take() {
            self.queue.push_back(Ok(ChatStreamEvent::Done(acc.into_response())));
        }
    }

    fn fail(&mut self, err: ProviderError) {
        if self.acc.take().is_some() {
            self.queue.push_back(Err(err));
        }
    }

    fn handle_data(&mut self, data: &str) {
        let data = data.trim();
        if data.is_empty() || self.finished() {
            return;
        }
        if data == "[DONE]" {
            self.finish();
            return;
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                let delta = self.acc.as_mut().and_then(|acc| acc.apply(chunk));
                if let Some(delta) = delta {
                    self.queue.push_back(Ok(ChatStreamEvent::Text(delta)));
                }
            }
            Err(err) => self.fail(ProviderError::Parse(format!("stream chunk: {}", err))),
        }
    }
}

fn event_stream(body: ByteStream) -> ChatStream {
    let state = StreamState {
        body,
        parser: SseParser::new(),
        queue: VecDeque::new(),
        acc: Some(StreamAccumulator::default()),
    };
    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.finished() {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for event in state.parser.feed(&bytes) {
                        state.handle_data(&event.data);
                    }
                }
                Some(Err(err)) => state.fail(err.into()),
                // servers that close without [DONE] still complete the turn
                None => state.finish(),
            }
        }
    }))
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.config.validate(&self.metadata)?;
        self.http.initialize(&self.config)
    }

    async fn terminate(&self) {
        self.http.terminate();
    }

    async fn test(&self) -> ProviderTestResult {
        let api_key = match self.config.require(KEY_API_KEY) {
            Ok(key) => key,
            Err(err) => return ProviderTestResult::failed(err),
        };
        let client = match self.http.client(&self.config) {
            Ok(client) => client,
            Err(err) => return ProviderTestResult::failed(err),
        };
        let request = client
            .get(join_url(&self.base_url(), "models"))
            .bearer_auth(api_key);
        check_models(request, |body| {
            body["data"]
                .as_array()
                .and_then(|models| models.first())
                .and_then(|model| model["id"].as_str())
                .map(str::to_string)
        })
        .await
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = self.request_body(&request, false);
        let response = self.post_chat(&body).await.map_err(|err| {
            log::error!("OpenAiProvider::chat(...): {}", err);
            err
        })?;
        let completion: Completion = response.json().await?;
        parse_completion(completion)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, ProviderError> {
        let body = self.request_body(&request, true);
        let response = self.post_chat(&body).await.map_err(|err| {
            log::error!("OpenAiProvider::chat_stream(...): {}", err);
            err
        })?;
        let bytes: ByteStream =
            Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())));
        Ok(event_stream(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(value: Value) -> StreamChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_tool_messages_use_function_calling_shape() {
        let assistant = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "forecast".into(),
                arguments: json!({"city": "Oslo"}),
            }],
        );
        let wire = wire_message(&assistant);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"city":"Oslo"}"#);

        let result = wire_message(&ChatMessage::tool_result("call_1", "rainy"));
        assert_eq!(result, json!({"role": "tool", "tool_call_id": "call_1", "content": "rainy"}));
    }

    #[test]
    fn test_tool_without_schema_gets_empty_object() {
        let wire = wire_tool(&ToolDefinition::new("ping", "no args"));
        assert_eq!(wire["function"]["parameters"], json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn test_parse_completion_with_tool_calls() {
        let completion: Completion = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"q\":\"cats\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();

        let response = parse_completion(completion).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls[0].arguments, json!({"q": "cats"}));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_stream_accumulates_tool_call_fragments() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(
            acc.apply(chunk(json!({"choices": [{"delta": {"content": "Hel"}}]}))),
            Some("Hel".to_string())
        );
        acc.apply(chunk(json!({"choices": [{"delta": {"content": "lo"}}]})));
        acc.apply(chunk(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "function": {"name": "feed", "arguments": "{\"fo"}}
        ]}}]})));
        assert_eq!(
            acc.apply(chunk(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "od\":\"fish\"}"}}
            ]}, "finish_reason": "tool_calls"}]}))),
            None
        );

        let response = acc.into_response();
        assert_eq!(response.content, "Hello");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.tool_calls[0].arguments, json!({"food": "fish"}));
    }

    #[test]
    fn test_unparsable_arguments_are_kept_as_text() {
        assert_eq!(parse_arguments("not json"), json!("not json"));
        assert_eq!(parse_arguments(""), json!({}));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_network() {
        let provider = OpenAiProvider::new(ProviderConfig::new(PROVIDER_ID));
        let err = provider
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfiguration(_)));
        assert!(matches!(
            provider.initialize().await,
            Err(ProviderError::InvalidConfiguration(_))
        ));
        assert!(!provider.test().await.success);
    }
}

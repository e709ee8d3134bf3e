//! Anthropic Claude provider (`POST {baseUrl}/v1/messages`).
//!
//! System messages are lifted into the top-level `system` field, tool calls map to
//! `tool_use` content blocks, and consecutive tool results are merged into one user turn
//! of `tool_result` blocks as the Messages API expects. There is no native streaming here;
//! [`LlmProvider::chat_stream`] keeps its two-event default.

use crate::clients::common::{check_models, check_status, HttpSlot};
use crate::http_client::join_url;
use crate::provider::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ConfigField, ConfigFieldType, LlmProvider,
    Provider, ProviderConfig, ProviderError, ProviderMetadata, ProviderTestResult, TokenUsage,
    ToolCall, KEY_API_KEY, KEY_BASE_URL, KEY_MODEL, KEY_PROXY, KEY_TIMEOUT,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub const PROVIDER_ID: &str = "claude";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";

pub fn metadata() -> ProviderMetadata {
    ProviderMetadata::new(PROVIDER_ID, "Anthropic Claude", "Anthropic Messages API")
        .with_field(ConfigField::new(KEY_API_KEY, "API key", ConfigFieldType::Password).required())
        .with_field(
            ConfigField::new(KEY_BASE_URL, "Base URL", ConfigFieldType::String)
                .with_default(DEFAULT_BASE_URL),
        )
        .with_field(
            ConfigField::new(KEY_MODEL, "Model", ConfigFieldType::Select)
                .with_default(DEFAULT_MODEL)
                .with_options(&[
                    "claude-sonnet-4-5",
                    "claude-haiku-4-5",
                    "claude-opus-4-1",
                    "claude-sonnet-4-0",
                ]),
        )
        .with_field(
            ConfigField::new("maxTokens", "Max tokens", ConfigFieldType::Number)
                .with_default("1024"),
        )
        .with_field(
            ConfigField::new(KEY_TIMEOUT, "Timeout (s)", ConfigFieldType::Number)
                .with_default("60"),
        )
        .with_field(ConfigField::new(KEY_PROXY, "Proxy", ConfigFieldType::String))
}

pub struct ClaudeProvider {
    metadata: ProviderMetadata,
    config: ProviderConfig,
    http: HttpSlot,
}

impl ClaudeProvider {
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

    fn request_body(&self, request: &ChatRequest) -> Value {
        let max_tokens = request.max_tokens.map(u64::from).unwrap_or_else(|| {
            self.config
                .get("maxTokens")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024)
        });
        let mut body = json!({
            "model": self.config.get(KEY_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            "max_tokens": max_tokens,
            "messages": wire_messages(&request.messages),
        });

        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool
                            .parameters
                            .clone()
                            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::new();
    for message in messages {
        match message.role {
            ChatRole::System => {}
            ChatRole::User => wire.push(json!({"role": "user", "content": message.content})),
            ChatRole::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.content}));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                wire.push(json!({"role": "assistant", "content": blocks}));
            }
            ChatRole::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                });
                let merged = match wire.last_mut() {
                    Some(last) if is_tool_result_turn(last) => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block.clone());
                        }
                        true
                    }
                    _ => false,
                };
                if !merged {
                    wire.push(json!({"role": "user", "content": [block]}));
                }
            }
        }
    }
    wire
}

fn is_tool_result_turn(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .map(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
            .unwrap_or(false)
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

fn parse_response(response: MessagesResponse) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text } => content.push_str(&text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::Other => {}
        }
    }
    ChatResponse {
        content,
        tool_calls,
        usage: response.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }),
        finish_reason: response.stop_reason,
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
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
            .get(join_url(&self.base_url(), "v1/models"))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION);
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
impl LlmProvider for ClaudeProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let api_key = self.config.require(KEY_API_KEY)?;
        let client = self.http.client(&self.config)?;
        let response = client
            .post(join_url(&self.base_url(), "v1/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await?;
        let response = check_status(response).await.map_err(|err| {
            log::error!("ClaudeProvider::chat(...): {}", err);
            err
        })?;
        let body: MessagesResponse = response.json().await?;
        Ok(parse_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_tool_results_share_one_user_turn() {
        let messages = vec![
            ChatMessage::system("You are a cat."),
            ChatMessage::user("weather and time?"),
            ChatMessage::assistant_with_tools(
                "Checking.",
                vec![
                    ToolCall { id: "a".into(), name: "weather".into(), arguments: json!({}) },
                    ToolCall { id: "b".into(), name: "clock".into(), arguments: json!({}) },
                ],
            ),
            ChatMessage::tool_result("a", "sunny"),
            ChatMessage::tool_result("b", "noon"),
        ];
        let wire = wire_messages(&messages);

        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["content"][0], json!({"type": "text", "text": "Checking."}));
        assert_eq!(wire[1]["content"][2]["type"], "tool_use");
        let results = wire[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["tool_use_id"], "b");
    }

    #[test]
    fn test_system_prompt_is_lifted() {
        let provider = ClaudeProvider::new(ProviderConfig::new(PROVIDER_ID).with_api_key("k"));
        let body = provider.request_body(&ChatRequest::new(vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hi"),
        ]));
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_tool_use_blocks() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "yarn"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 7, "output_tokens": 3}
        }))
        .unwrap();
        let parsed = parse_response(response);
        assert_eq!(parsed.content, "Let me look.");
        assert_eq!(parsed.tool_calls[0].arguments, json!({"q": "yarn"}));
        assert_eq!(parsed.usage.unwrap().total_tokens, 10);
    }
}

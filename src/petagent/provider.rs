//! Provider abstraction shared by every LLM and TTS back end.
//!
//! A *provider type* is described by immutable [`ProviderMetadata`]: what it is called and
//! which configuration fields it understands. A *provider instance* is a live adapter built
//! from a [`ProviderConfig`] by the registry factory (see
//! [`provider_registry`](crate::provider_registry)).
//!
//! Every instance follows the same lifecycle:
//!
//! ```text
//! create ─▶ initialize() ─▶ chat()/synthesize()/test() ... ─▶ terminate()
//! ```
//!
//! `initialize()` is idempotent and prepares the HTTP client; `terminate()` drops it. A
//! missing required credential never degrades into a silent no-op: the operation fails with
//! [`ProviderError::InvalidConfiguration`].
//!
//! # Example
//!
//! ```rust
//! use petagent::provider::{ConfigField, ConfigFieldType, ProviderConfig, ProviderMetadata};
//!
//! let metadata = ProviderMetadata::new("openai", "OpenAI", "Chat completions")
//!     .with_field(ConfigField::new("apiKey", "API key", ConfigFieldType::Password).required())
//!     .with_field(
//!         ConfigField::new("model", "Model", ConfigFieldType::Select)
//!             .with_default("gpt-4o-mini")
//!             .with_options(&["gpt-4o-mini", "gpt-4o"]),
//!     );
//!
//! let config = ProviderConfig::new("openai").with_defaults(&metadata);
//! assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
//! assert!(config.require("apiKey").is_err());
//! ```

use crate::tool_protocol::ToolDefinition;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::pin::Pin;

/// Well-known configuration keys mapped onto [`ProviderConfig`] fields.
pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_BASE_URL: &str = "baseUrl";
pub const KEY_MODEL: &str = "model";
pub const KEY_TIMEOUT: &str = "timeout";
pub const KEY_PROXY: &str = "proxy";

/// Input widget type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Password,
    Number,
    Select,
    Boolean,
}

/// Describes one configuration field a provider type understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Choices for [`ConfigFieldType::Select`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConfigField {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        field_type: ConfigFieldType,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            required: false,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

/// Immutable description of a provider *type*.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Ordered as they should be presented to the user.
    pub config_fields: Vec<ConfigField>,
}

impl ProviderMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            config_fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: ConfigField) -> Self {
        self.config_fields.push(field);
        self
    }

    pub fn field(&self, key: &str) -> Option<&ConfigField> {
        self.config_fields.iter().find(|f| f.key == key)
    }
}

/// Connection parameters for one provider instance.
///
/// The common vendor parameters get their own fields; anything else lives in `extra`
/// under its metadata key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider type id this configuration is meant for.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Proxy URL applied to every request, e.g. `http://127.0.0.1:7890`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Value stored under a metadata key; blank strings count as missing.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            KEY_API_KEY => non_empty(&self.api_key).map(str::to_string),
            KEY_BASE_URL => non_empty(&self.base_url).map(str::to_string),
            KEY_MODEL => non_empty(&self.model).map(str::to_string),
            KEY_TIMEOUT => self.timeout.map(|t| t.to_string()),
            KEY_PROXY => non_empty(&self.proxy).map(str::to_string),
            _ => self
                .extra
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned(),
        }
    }

    /// Store a value under a metadata key. An unparsable timeout is dropped.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key {
            KEY_API_KEY => self.api_key = Some(value),
            KEY_BASE_URL => self.base_url = Some(value),
            KEY_MODEL => self.model = Some(value),
            KEY_TIMEOUT => self.timeout = value.trim().parse().ok(),
            KEY_PROXY => self.proxy = Some(value),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Copy with every missing or unparsable value replaced by the declared default.
    pub fn with_defaults(mut self, metadata: &ProviderMetadata) -> Self {
        for field in &metadata.config_fields {
            let default = match &field.default {
                Some(default) => default,
                None => continue,
            };
            let valid = match (self.get(&field.key), field.field_type) {
                (None, _) => false,
                (Some(v), ConfigFieldType::Number) => v.trim().parse::<f64>().is_ok(),
                (Some(v), ConfigFieldType::Boolean) => v.trim().parse::<bool>().is_ok(),
                (Some(v), ConfigFieldType::Select) => {
                    field.options.is_empty() || field.options.contains(&v)
                }
                (Some(_), _) => true,
            };
            if !valid {
                self.set(&field.key, default.clone());
            }
        }
        self
    }

    /// Value for `key`, or [`ProviderError::InvalidConfiguration`] when it is missing.
    pub fn require(&self, key: &str) -> Result<String, ProviderError> {
        self.get(key).ok_or_else(|| {
            ProviderError::InvalidConfiguration(format!("missing required field '{}'", key))
        })
    }

    /// Check that every field the metadata marks as required has a value.
    pub fn validate(&self, metadata: &ProviderMetadata) -> Result<(), ProviderError> {
        for field in metadata.config_fields.iter().filter(|f| f.required) {
            self.require(&field.key)?;
        }
        Ok(())
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false)
    }
}

/// Which capability a provider instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCapability {
    Llm,
    Tts,
}

impl fmt::Display for ProviderCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCapability::Llm => write!(f, "llm"),
            ProviderCapability::Tts => write!(f, "tts"),
        }
    }
}

/// Named, persisted binding of a [`ProviderConfig`] to a provider type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInstanceConfig {
    pub id: String,
    pub name: String,
    pub provider_type: String,
    pub capability: ProviderCapability,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub primary: bool,
    pub config: ProviderConfig,
}

fn default_enabled() -> bool {
    true
}

impl ProviderInstanceConfig {
    /// New enabled, non-primary instance with a fresh id.
    pub fn new(
        name: impl Into<String>,
        capability: ProviderCapability,
        config: ProviderConfig,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            provider_type: config.id.clone(),
            capability,
            enabled: true,
            primary: false,
            config,
        }
    }
}

/// Errors raised by providers, registries and the instance manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// A required credential or setting is missing or malformed.
    InvalidConfiguration(String),
    /// No factory is registered for the provider type id.
    UnknownProvider(String),
    /// No instance with that id, or none marked primary.
    InstanceNotFound(String),
    /// The instance exists but is disabled.
    Disabled(String),
    /// The vendor answered with a non-success status.
    Http { status: u16, body: String },
    /// Network failure, timeout or unreadable body.
    Transport(String),
    /// The vendor payload could not be interpreted.
    Parse(String),
    Unsupported(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            ProviderError::UnknownProvider(id) => write!(f, "Unknown provider type: {}", id),
            ProviderError::InstanceNotFound(id) => write!(f, "Provider instance not found: {}", id),
            ProviderError::Disabled(id) => write!(f, "Provider instance is disabled: {}", id),
            ProviderError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ProviderError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ProviderError::Parse(msg) => write!(f, "Unexpected response: {}", msg),
            ProviderError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTestResult {
    pub success: bool,
    pub error: Option<String>,
    /// A model the endpoint reported, when it lists any.
    pub sample_model: Option<String>,
}

impl ProviderTestResult {
    pub fn ok(sample_model: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            sample_model,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            sample_model: None,
        }
    }
}

/// Lifecycle shared by LLM and TTS providers.
#[async_trait]
pub trait Provider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    /// Effective configuration, defaults already applied.
    fn config(&self) -> &ProviderConfig;

    /// Prepare the network client. Calling it again is a no-op.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Release the network client. The provider may be initialized again afterwards.
    async fn terminate(&self);

    /// Check the endpoint with the current configuration.
    async fn test(&self) -> ProviderTestResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// Result of a tool call fed back to the model.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor correlation id, echoed back with the result.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Assistant turn that requested tools.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call; vendor function-calling payloads are generated from these.
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// One element of a chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    /// Next piece of assistant text.
    Text(String),
    /// End of the turn, carrying the aggregated response (tool calls included).
    Done(ChatResponse),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent, ProviderError>> + Send>>;

/// Chat-capable provider.
#[async_trait]
pub trait LlmProvider: Provider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Incremental variant of [`LlmProvider::chat`].
    ///
    /// Vendors without a native streaming API keep this default: exactly two events, the
    /// full text and then completion.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, ProviderError> {
        let response = self.chat(request).await?;
        let events = vec![
            Ok(ChatStreamEvent::Text(response.content.clone())),
            Ok(ChatStreamEvent::Done(response)),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    /// Vendor voice id; the configured default is used when `None`.
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResponse {
    pub audio: Vec<u8>,
    pub mime_type: String,
}

/// Speech synthesis provider.
#[async_trait]
pub trait TtsProvider: Provider {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<SynthesisResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn metadata() -> ProviderMetadata {
        ProviderMetadata::new("demo", "Demo", "test provider")
            .with_field(ConfigField::new(KEY_API_KEY, "Key", ConfigFieldType::Password).required())
            .with_field(
                ConfigField::new(KEY_MODEL, "Model", ConfigFieldType::Select)
                    .with_default("small")
                    .with_options(&["small", "large"]),
            )
            .with_field(
                ConfigField::new(KEY_TIMEOUT, "Timeout", ConfigFieldType::Number)
                    .with_default("45"),
            )
            .with_field(
                ConfigField::new("stream", "Stream", ConfigFieldType::Boolean)
                    .with_default("true"),
            )
    }

    #[test]
    fn test_unknown_values_fall_back_to_defaults() {
        let config = ProviderConfig::new("demo")
            .with_model("huge")
            .with_extra("stream", "maybe")
            .with_defaults(&metadata());

        assert_eq!(config.model.as_deref(), Some("small"));
        assert_eq!(config.timeout, Some(45));
        assert!(config.flag("stream"));
    }

    #[test]
    fn test_valid_values_are_kept() {
        let mut config = ProviderConfig::new("demo").with_model("large");
        config.set(KEY_TIMEOUT, "10");
        let config = config.with_defaults(&metadata());
        assert_eq!(config.model.as_deref(), Some("large"));
        assert_eq!(config.timeout, Some(10));
    }

    #[test]
    fn test_missing_credential_is_invalid_configuration() {
        let config = ProviderConfig::new("demo").with_api_key("  ");
        let err = config.validate(&metadata()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("apiKey"));

        assert!(config.with_api_key("sk").validate(&metadata()).is_ok());
    }

    struct Echo {
        metadata: ProviderMetadata,
        config: ProviderConfig,
    }

    #[async_trait]
    impl Provider for Echo {
        fn metadata(&self) -> &ProviderMetadata {
            &self.metadata
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn terminate(&self) {}
        async fn test(&self) -> ProviderTestResult {
            ProviderTestResult::ok(None)
        }
    }

    #[async_trait]
    impl LlmProvider for Echo {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                ..ChatResponse::default()
            })
        }
    }

    #[tokio::test]
    async fn test_default_stream_is_text_then_done() {
        let echo = Echo {
            metadata: metadata(),
            config: ProviderConfig::new("demo"),
        };
        let events: Vec<_> = echo
            .chat_stream(ChatRequest::new(vec![ChatMessage::user("hi there")]))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(ChatStreamEvent::Text("hi there".into())));
        match &events[1] {
            Ok(ChatStreamEvent::Done(response)) => assert_eq!(response.content, "hi there"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_instance_config_serializes_camel_case() {
        let instance = ProviderInstanceConfig::new(
            "Main",
            ProviderCapability::Llm,
            ProviderConfig::new("openai").with_api_key("sk"),
        );
        let value = serde_json::to_value(&instance).unwrap();
        assert_eq!(value["providerType"], "openai");
        assert_eq!(value["capability"], "llm");
        assert_eq!(value["config"]["apiKey"], "sk");
        assert_eq!(value["enabled"], true);
    }
}

//! Provider-agnostic tool model.
//!
//! Tools come from heterogeneous sources (in-process plugins, MCP bridges) but every one of
//! them is described by a [`ToolDefinition`] and answers with a [`ToolResult`]. Vendor
//! function-calling formats are generated from the definition at the LLM-provider boundary.
//!
//! # Architecture
//!
//! ```text
//! LLM tool call → PluginManager::execute_tool → ToolProvider (trait)
//!              → [plugin | McpToolProvider]
//! ```
//!
//! # Example
//!
//! ```rust
//! use petagent::tool_protocol::{ToolDefinition, ToolParameter, ToolParameterType};
//!
//! let tool = ToolDefinition::new("forecast", "Weather forecast for a city")
//!     .with_parameter(
//!         ToolParameter::new("city", ToolParameterType::String)
//!             .with_description("City name")
//!             .required(),
//!     );
//!
//! let schema = tool.parameters.unwrap();
//! assert_eq!(schema["required"][0], "city");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Result of one tool execution. `output` is meaningful on success, `error` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    /// Provenance and diagnostics (owning provider, remote server, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Text handed back to the model: the error on failure, otherwise the payload
    /// (strings verbatim, anything else as JSON).
    pub fn to_model_text(&self) -> String {
        if !self.success {
            return format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"));
        }
        match &self.output {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// JSON-schema type of a tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn as_str(self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// Builder for one property of a tool's parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
    /// Item type for arrays.
    pub items: Option<ToolParameterType>,
    pub enum_values: Vec<String>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            items: None,
            enum_values: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(item_type);
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    fn to_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.as_str()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if let Some(items) = self.items {
            schema.insert("items".into(), json!({ "type": items.as_str() }));
        }
        if !self.enum_values.is_empty() {
            schema.insert("enum".into(), json!(self.enum_values));
        }
        Value::Object(schema)
    }
}

/// Schema-described callable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object, or `None` for tools without arguments.
    pub parameters: Option<Value>,
    /// The host must confirm with the user before the call runs.
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
            requires_confirmation: false,
        }
    }

    /// Use a ready-made JSON schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    /// Add one property to the object schema, creating it on first use.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        let mut schema = match self.parameters.take() {
            Some(Value::Object(schema)) => schema,
            _ => {
                let mut fresh = Map::new();
                fresh.insert("type".into(), json!("object"));
                fresh
            }
        };

        if let Value::Object(properties) = schema
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()))
        {
            properties.insert(param.name.clone(), param.to_schema());
        }
        if param.required {
            if let Value::Array(required) = schema
                .entry("required")
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                required.push(json!(param.name));
            }
        }

        self.parameters = Some(Value::Object(schema));
        self
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// The `{name, description, parameters}` shape exported to models.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Anything that owns a set of tools: a plugin, or a bridge to a remote server.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Stable id, unique among registered providers.
    fn id(&self) -> &str;

    /// Tools currently exposed.
    fn get_tools(&self) -> Vec<ToolDefinition>;

    /// Run one of this provider's tools.
    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;
}

/// Error types for tool operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// No enabled provider exposes the tool.
    NotFound(String),
    /// The tool or its provider is switched off.
    Disabled(String),
    /// The provider ran but failed.
    ExecutionFailed(String),
    /// Arguments failed validation or deserialization.
    InvalidParameters(String),
    /// A lower level protocol/transport error occurred.
    ProtocolError(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::Disabled(name) => write!(f, "Tool is disabled: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl Error for ToolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_builder_produces_object_schema() {
        let tool = ToolDefinition::new("feed", "Feed the pet")
            .with_parameter(
                ToolParameter::new("food", ToolParameterType::String)
                    .with_enum(&["apple", "fish"])
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("amount", ToolParameterType::Integer).with_default(json!(1)),
            );

        let schema = tool.parameters.unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["food"]["enum"], json!(["apple", "fish"]));
        assert_eq!(schema["properties"]["amount"]["default"], 1);
        assert_eq!(schema["required"], json!(["food"]));
    }

    #[test]
    fn test_exported_shape() {
        let bare = ToolDefinition::new("ping", "No arguments");
        assert_eq!(
            bare.to_json(),
            json!({"name": "ping", "description": "No arguments", "parameters": null})
        );
    }

    #[test]
    fn test_model_text() {
        assert_eq!(ToolResult::success(json!("sunny")).to_model_text(), "sunny");
        assert_eq!(ToolResult::success(json!({"t": 3})).to_model_text(), r#"{"t":3}"#);
        assert_eq!(
            ToolResult::failure("Tool is disabled: x").to_model_text(),
            "Error: Tool is disabled: x"
        );
    }
}

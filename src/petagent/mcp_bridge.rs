//! [`ToolProvider`] view of one MCP server.
//!
//! The bridge advertises the tools the client discovered when it was bridged and forwards
//! every execution as a `tools/call`. Text blocks of the result are joined with `\n` into a
//! single string payload; image and resource blocks are dropped. Nothing escapes as an
//! error: transport trouble and remote tool errors both come back as failed [`ToolResult`]s.

use crate::event::{EventHandler, McpEvent};
use crate::tool_protocol::{ToolDefinition, ToolProvider, ToolResult};
use async_trait::async_trait;
use log::debug;
use mcp::{McpClient, McpTool};
use serde_json::Value;
use std::error::Error;
use std::sync::{Arc, PoisonError, RwLock};

/// Provider id used for a server's bridge.
pub fn bridge_id(server: &str) -> String {
    format!("mcp:{}", server)
}

/// Remote tool definitions map 1:1; a missing description becomes empty.
pub fn to_tool_definition(tool: &McpTool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        parameters: tool.input_schema.clone(),
        requires_confirmation: false,
    }
}

pub struct McpToolProvider {
    id: String,
    client: Arc<McpClient>,
    tools: RwLock<Vec<ToolDefinition>>,
    events: Option<Arc<dyn EventHandler>>,
}

impl McpToolProvider {
    pub fn new(client: Arc<McpClient>) -> Self {
        let tools = client.tools().iter().map(to_tool_definition).collect();
        Self {
            id: bridge_id(client.name()),
            client,
            tools: RwLock::new(tools),
            events: None,
        }
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    pub fn server(&self) -> &str {
        self.client.name()
    }

    async fn emit(&self, event: McpEvent) {
        if let Some(events) = &self.events {
            events.on_mcp_event(&event).await;
        }
    }

    /// Pick up the tool list of a fresh connection.
    fn refresh_tools(&self) {
        if !self.client.is_connected() {
            return;
        }
        let tools: Vec<ToolDefinition> =
            self.client.tools().iter().map(to_tool_definition).collect();
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
    }
}

#[async_trait]
impl ToolProvider for McpToolProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let server = self.server().to_string();
        let was_connected = self.client.is_connected();
        if !was_connected {
            self.emit(McpEvent::Reconnecting {
                server: server.clone(),
            })
            .await;
        }

        let result = self.client.call_tool(name, arguments).await;
        // the call may have reconnected
        self.refresh_tools();

        let text = result.text();
        let tool_result = if result.is_error {
            let error = if text.is_empty() {
                format!("Remote tool '{}' reported an error", name)
            } else {
                text
            };
            ToolResult::failure(error)
        } else {
            ToolResult::success(Value::String(text))
        };
        debug!(
            "McpToolProvider[{}]::execute_tool(...): '{}' success={}",
            server, name, tool_result.success
        );

        self.emit(McpEvent::ToolCallCompleted {
            server: server.clone(),
            tool_name: name.to_string(),
            success: tool_result.success,
        })
        .await;
        Ok(tool_result.with_metadata("mcpServer", Value::String(server)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_mapping() {
        let tool = McpTool {
            name: "read_file".into(),
            description: None,
            input_schema: Some(json!({
                "type": "object",
                "properties": {"path": {"type": "string"}}
            })),
        };
        let definition = to_tool_definition(&tool);
        assert_eq!(definition.name, "read_file");
        assert_eq!(definition.description, "");
        assert_eq!(definition.parameters.unwrap()["properties"]["path"]["type"], "string");
        assert!(!definition.requires_confirmation);
    }

    #[test]
    fn test_bridge_id() {
        assert_eq!(bridge_id("files"), "mcp:files");
    }
}

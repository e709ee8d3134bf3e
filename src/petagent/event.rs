//! Callback-based observability for the agent loop and the MCP manager.
//!
//! Implement [`EventHandler`] and override only the methods you care about; both have
//! no-op defaults. The handler is shared as `Arc<dyn EventHandler>`.
//!
//! ```rust
//! use async_trait::async_trait;
//! use petagent::event::{AgentEvent, EventHandler, McpEvent};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         if let AgentEvent::ToolExecutionCompleted { tool_name, success, .. } = event {
//!             println!("{} -> {}", tool_name, success);
//!         }
//!     }
//!
//!     async fn on_mcp_event(&self, event: &McpEvent) {
//!         println!("mcp: {:?}", event);
//!     }
//! }
//! ```

use crate::provider::TokenUsage;
use async_trait::async_trait;

/// Events emitted by an [`Agent`](crate::agent::Agent) while running one turn.
///
/// # Event Flow
///
/// ```text
/// TurnStarted
///   └─ LlmCallStarted { iteration: 1 }
///   └─ LlmCallCompleted { iteration: 1 }
///   └─ (for every tool call in the response)
///       ├─ ToolCallDetected
///       ├─ ToolCallDeclined            (only when confirmation is refused)
///       └─ ToolExecutionCompleted
///   └─ LlmCallStarted { iteration: 2 } ...
///   └─ ToolMaxIterationsReached        (only when the cap is hit)
/// TurnCompleted
/// ```
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStarted {
        agent_id: String,
        /// First ~120 characters of the user message.
        message_preview: String,
    },
    TurnCompleted {
        agent_id: String,
        tool_calls_made: usize,
        response_length: usize,
        tokens_used: Option<TokenUsage>,
    },
    /// Before each LLM round trip. Iteration 1 is the initial call.
    LlmCallStarted { agent_id: String, iteration: usize },
    LlmCallCompleted {
        agent_id: String,
        iteration: usize,
        tool_calls: usize,
        response_length: usize,
    },
    ToolCallDetected {
        agent_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        iteration: usize,
    },
    /// The confirmation hook refused a tool that requires confirmation.
    ToolCallDeclined {
        agent_id: String,
        tool_name: String,
        iteration: usize,
    },
    ToolExecutionCompleted {
        agent_id: String,
        tool_name: String,
        success: bool,
        error: Option<String>,
        iteration: usize,
    },
    /// The model kept requesting tools after the last allowed iteration.
    ToolMaxIterationsReached { agent_id: String, max_iterations: usize },
}

/// Events emitted by the [`McpManager`](crate::mcp_manager::McpManager) and its bridges.
#[derive(Debug, Clone, PartialEq)]
pub enum McpEvent {
    Connecting { server: String },
    Connected { server: String, tool_count: usize },
    ConnectFailed { server: String, error: String },
    Disconnected { server: String },
    /// A tool call found the client disconnected; the client reconnects once.
    Reconnecting { server: String },
    ToolCallCompleted {
        server: String,
        tool_name: String,
        success: bool,
    },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    async fn on_mcp_event(&self, _event: &McpEvent) {}
}

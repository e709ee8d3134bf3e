//! # petagent MCP
//!
//! Client-side runtime for the Model Context Protocol (revision `2024-11-05`) over the
//! SSE transport.
//!
//! The crate is split into small layers:
//!
//! * [`sse`]: an incremental `text/event-stream` parser that turns raw body chunks into
//!   discrete [`sse::SseEvent`]s.
//! * [`jsonrpc`]: JSON-RPC 2.0 envelopes used on the wire.
//! * [`types`]: MCP payloads (tools, content blocks, server configuration and status).
//! * [`client`]: [`McpClient`], the per-server protocol engine that owns the streaming
//!   connection, correlates requests with responses and discovers tools.
//!
//! ```rust,no_run
//! use mcp::{McpClient, McpClientOptions, McpServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = McpServerConfig::new("weather", "http://localhost:3001/sse");
//! let client = McpClient::new(config, McpClientOptions::default())?;
//! client.connect().await?;
//!
//! for tool in client.tools() {
//!     println!("{}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool("forecast", serde_json::json!({"city": "Berlin"}))
//!     .await;
//! println!("{}", result.text());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod sse;
pub mod types;

pub use client::{McpClient, McpClientOptions};
pub use error::McpError;
pub use jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use types::{
    CallToolResult, ConnectionState, ContentBlock, Implementation, InitializeResult,
    McpServerConfig, McpServerStatus, McpTool, PROTOCOL_VERSION,
};

#[cfg(feature = "test-server")]
pub mod testing;

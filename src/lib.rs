//! # petagent
//!
//! petagent is the agent runtime embedded in a virtual-pet app. It lets the host talk to any
//! number of LLM and TTS back ends through one provider contract, and lets those models call
//! tools that come either from in-process plugins or from remote Model Context Protocol servers.
//!
//! The crate is layered leaf to root:
//!
//! * **Providers**: [`provider`] defines the [`LlmProvider`] / [`TtsProvider`] contract,
//!   [`provider_registry`] maps provider-type ids to factories, [`clients`] ships the built-in
//!   OpenAI, Claude, OpenAI TTS and ElevenLabs adapters, and [`provider_instances`] manages the
//!   user's persisted instances and the primary one per capability.
//! * **Plugins and tools**: [`plugin`] holds the capability traits, [`PluginManager`] aggregates
//!   tool providers, panels and slash-commands and owns per-plugin configuration.
//! * **MCP**: the [`mcp`] workspace crate implements the SSE client; [`McpManager`] supervises
//!   one client per configured server and bridges its tools into the [`PluginManager`] through
//!   [`mcp_bridge::McpToolProvider`].
//! * **Agent**: [`Agent`] runs a chat turn, executing the tool calls the model asks for until it
//!   produces a final answer.
//!
//! ## Wiring it together
//!
//! ```rust,no_run
//! use petagent::clients::register_builtin_llm_providers;
//! use petagent::provider::{ProviderCapability, ProviderConfig, ProviderInstanceConfig};
//! use petagent::provider_registry::{LlmProviderRegistry, TtsProviderRegistry};
//! use petagent::store::MemoryPluginConfigStore;
//! use petagent::{Agent, McpManager, PluginManager, ProviderInstanceManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     petagent::init_logger();
//!
//!     let mut llm = LlmProviderRegistry::new();
//!     register_builtin_llm_providers(&mut llm);
//!     let providers =
//!         ProviderInstanceManager::new(Arc::new(llm), Arc::new(TtsProviderRegistry::new()));
//!     providers.add_instance(ProviderInstanceConfig::new(
//!         "Default",
//!         ProviderCapability::Llm,
//!         ProviderConfig::new("openai").with_api_key(std::env::var("OPENAI_API_KEY")?),
//!     ))?;
//!
//!     let plugins = Arc::new(PluginManager::new(Arc::new(MemoryPluginConfigStore::new())));
//!     let mcp = McpManager::new(Arc::clone(&plugins));
//!     let files = petagent::mcp::McpServerConfig::new("files", "http://127.0.0.1:3001/sse");
//!     mcp.initialize(vec![files]).await;
//!
//!     let agent = Agent::new("pet", providers.primary_llm().await?, Arc::clone(&plugins))
//!         .with_system_prompt("You are a small, helpful cat.");
//!     let reply = agent.run("What files are on my desktop?").await?;
//!     println!("{}", reply.content);
//!
//!     mcp.shutdown().await;
//!     providers.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Hosts that already install a logger can skip this; everything in the crate logs through the
/// [`log`] facade.
///
/// ```rust
/// petagent::init_logger();
/// petagent::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `petagent` module.
pub mod petagent;

pub use ::mcp;

// Re-exporting key items for easier external access.
pub use petagent::agent;
pub use petagent::agent::{Agent, AgentError, AgentReply, ConfirmationHook};
pub use petagent::clients;
pub use petagent::event;
pub use petagent::event::{AgentEvent, EventHandler, McpEvent};
pub use petagent::http_client;
pub use petagent::mcp_bridge;
pub use petagent::mcp_manager;
pub use petagent::mcp_manager::{McpManager, McpManagerError};
pub use petagent::plugin;
pub use petagent::plugin::{CommandSource, PanelProvider, Plugin};
pub use petagent::plugin_manager;
pub use petagent::plugin_manager::PluginManager;
pub use petagent::provider;
pub use petagent::provider::{LlmProvider, Provider, ProviderError, TtsProvider};
pub use petagent::provider_instances;
pub use petagent::provider_instances::ProviderInstanceManager;
pub use petagent::provider_registry;
pub use petagent::store;
pub use petagent::tool_protocol;
pub use petagent::tool_protocol::{ToolDefinition, ToolError, ToolProvider, ToolResult};
pub use petagent::tool_providers;

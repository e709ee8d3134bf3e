// src/petagent/mod.rs

pub mod agent;
pub mod clients;
pub mod event;
pub mod http_client;
pub mod mcp_bridge;
pub mod mcp_manager;
pub mod plugin;
pub mod plugin_manager;
pub mod provider;
pub mod provider_instances;
pub mod provider_registry;
pub mod store;
pub mod tool_protocol;
pub mod tool_providers;

// Export the managers so they are reachable without spelling out their modules
pub use mcp_manager::McpManager;
pub use plugin_manager::PluginManager;
pub use provider_instances::ProviderInstanceManager;

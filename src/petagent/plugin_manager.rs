//! Central directory of tools, panels and slash-commands.
//!
//! [`PluginManager`] aggregates:
//!
//! * **Tool providers**, either contributed by a [`Plugin`] or registered directly (MCP bridges).
//!   Tool names are resolved in registration order and the first enabled provider that exposes
//!   a name owns it. A tool can additionally be switched off by name through a global override
//!   map, independently of its provider.
//! * **Panels** contributed by plugins.
//! * **Commands**, a flat namespace where each command remembers the plugin (or other source)
//!   that registered it. Unregistering a plugin removes exactly the commands it owns.
//! * **Plugin configuration**, one JSON object per plugin id, kept in a single document that is
//!   loaded once and rewritten in full through the [`PluginConfigStore`] on every change.
//!
//! Every shared map is held behind an `Arc` and replaced as a whole on mutation, so readers
//! always see a consistent snapshot and never hold a lock across an `.await`.
//!
//! ```rust
//! use petagent::plugin_manager::PluginManager;
//! use petagent::store::MemoryPluginConfigStore;
//! use petagent::tool_protocol::{ToolDefinition, ToolResult};
//! use petagent::tool_providers::FunctionToolProvider;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let manager = PluginManager::new(Arc::new(MemoryPluginConfigStore::new()));
//!
//! let toys = FunctionToolProvider::new("toys");
//! toys.register_tool(
//!     ToolDefinition::new("squeak", "Squeak the toy"),
//!     Arc::new(|_args| Ok(ToolResult::success(json!("squeak!")))),
//! );
//! manager.register_tool_provider(Arc::new(toys));
//!
//! let result = manager.execute_tool("squeak", json!({})).await;
//! assert_eq!(result.output, json!("squeak!"));
//!
//! manager.set_tool_enabled("squeak", false);
//! assert!(!manager.execute_tool("squeak", json!({})).await.success);
//! # }
//! ```

use crate::plugin::{CommandHandler, PanelDescriptor, PanelProvider, Plugin, PluginConfig};
use crate::store::{PluginConfigStore, StoreError};
use crate::tool_protocol::{ToolDefinition, ToolError, ToolProvider, ToolResult};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A value published as an immutable snapshot and replaced whole on every write.
struct Published<T> {
    current: RwLock<Arc<T>>,
}

impl<T: Clone> Published<T> {
    fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update<R>(&self, change: impl FnOnce(&mut T) -> R) -> R {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = T::clone(&current);
        let output = change(&mut next);
        *current = Arc::new(next);
        output
    }
}

#[derive(Clone)]
struct ProviderEntry {
    provider: Arc<dyn ToolProvider>,
    /// Plugin that contributed the provider, if any.
    owner: Option<String>,
}

#[derive(Clone)]
struct PanelEntry {
    provider: Arc<dyn PanelProvider>,
    owner: String,
}

#[derive(Clone)]
struct CommandEntry {
    description: String,
    handler: CommandHandler,
    source: String,
    enabled: bool,
}

/// Listing view of a registered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    /// Id of whoever registered the command, usually a plugin id.
    pub source: String,
    pub enabled: bool,
}

/// One row of [`PluginManager::list_tools`]: every declared tool, shadowed or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolListing {
    pub provider_id: String,
    pub definition: ToolDefinition,
    /// Provider enabled and no `false` override for the name.
    pub enabled: bool,
    /// An earlier provider already owns this name.
    pub shadowed: bool,
}

pub struct PluginManager {
    plugins: Published<Vec<Arc<dyn Plugin>>>,
    providers: Published<Vec<ProviderEntry>>,
    disabled_providers: Published<HashSet<String>>,
    tool_overrides: Published<HashMap<String, bool>>,
    panels: Published<Vec<PanelEntry>>,
    commands: Published<BTreeMap<String, CommandEntry>>,
    store: Arc<dyn PluginConfigStore>,
    configs: Mutex<Map<String, Value>>,
}

/// Parse the persisted document. Anything unreadable counts as empty.
fn load_configs(store: &dyn PluginConfigStore) -> Map<String, Value> {
    let raw = match store.load_all() {
        Ok(Some(raw)) => raw,
        Ok(None) => return Map::new(),
        Err(err) => {
            warn!("PluginManager: could not load plugin configuration: {}", err);
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                "PluginManager: plugin configuration is not an object ({}), starting empty",
                other
            );
            Map::new()
        }
        Err(err) => {
            warn!("PluginManager: malformed plugin configuration, starting empty: {}", err);
            Map::new()
        }
    }
}

impl PluginManager {
    /// Create a manager and load the plugin configuration document once.
    pub fn new(store: Arc<dyn PluginConfigStore>) -> Self {
        let configs = load_configs(store.as_ref());
        Self {
            plugins: Published::new(Vec::new()),
            providers: Published::new(Vec::new()),
            disabled_providers: Published::new(HashSet::new()),
            tool_overrides: Published::new(HashMap::new()),
            panels: Published::new(Vec::new()),
            commands: Published::new(BTreeMap::new()),
            store,
            configs: Mutex::new(configs),
        }
    }

    // ------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------

    /// Load a plugin with its persisted configuration and register its capabilities.
    ///
    /// A plugin already registered under the same id is unloaded first. When `on_load` fails
    /// nothing is registered and the error is returned.
    pub async fn register_plugin(
        &self,
        plugin: Arc<dyn Plugin>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let id = plugin.id().to_string();
        if self.plugin(&id).is_some() {
            self.unregister_plugin(&id).await;
        }

        plugin.on_load(self.get_plugin_config(&id)).await.map_err(|err| {
            warn!("PluginManager::register_plugin(...): '{}' failed to load: {}", id, err);
            err
        })?;

        if let Some(provider) = Arc::clone(&plugin).as_tool_provider() {
            self.insert_provider(provider, Some(id.clone()));
        }
        if let Some(provider) = Arc::clone(&plugin).as_panel_provider() {
            let owner = id.clone();
            self.panels.update(|panels| panels.push(PanelEntry { provider, owner }));
        }
        if let Some(source) = Arc::clone(&plugin).as_command_source() {
            for spec in source.commands() {
                self.register_command(&spec.name, &spec.description, spec.handler, &id);
            }
        }
        self.plugins.update(|plugins| plugins.push(plugin));
        info!("PluginManager::register_plugin(...): loaded '{}'", id);
        Ok(())
    }

    /// Remove a plugin, everything it contributed, and every command it owns.
    /// Returns `false` if no such plugin was registered.
    pub async fn unregister_plugin(&self, id: &str) -> bool {
        let removed = self.plugins.update(|plugins| {
            let index = plugins.iter().position(|p| p.id() == id)?;
            Some(plugins.remove(index))
        });
        let plugin = match removed {
            Some(plugin) => plugin,
            None => return false,
        };

        self.providers
            .update(|providers| providers.retain(|e| e.owner.as_deref() != Some(id)));
        self.panels.update(|panels| panels.retain(|e| e.owner != id));
        let dropped = self.commands.update(|commands| {
            let before = commands.len();
            commands.retain(|_, entry| entry.source != id);
            before - commands.len()
        });
        plugin.on_unload().await;
        info!(
            "PluginManager::unregister_plugin(...): unloaded '{}' ({} commands removed)",
            id, dropped
        );
        true
    }

    pub fn plugin(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.load().iter().find(|p| p.id() == id).cloned()
    }

    /// Ids of loaded plugins in load order.
    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.load().iter().map(|p| p.id().to_string()).collect()
    }

    /// Unload every plugin, last loaded first.
    pub async fn shutdown(&self) {
        let ids = self.plugin_ids();
        for id in ids.iter().rev() {
            self.unregister_plugin(id).await;
        }
    }

    // ------------------------------------------------------------------
    // Tool providers
    // ------------------------------------------------------------------

    fn insert_provider(&self, provider: Arc<dyn ToolProvider>, owner: Option<String>) {
        let id = provider.id().to_string();
        self.providers.update(|providers| {
            let entry = ProviderEntry { provider, owner };
            // same id keeps its resolution position
            match providers.iter_mut().find(|e| e.provider.id() == id) {
                Some(existing) => *existing = entry,
                None => providers.push(entry),
            }
        });
        debug!("PluginManager: tool provider '{}' registered", id);
    }

    /// Register a provider that is not tied to a plugin's lifecycle.
    pub fn register_tool_provider(&self, provider: Arc<dyn ToolProvider>) {
        self.insert_provider(provider, None);
    }

    pub fn unregister_tool_provider(&self, id: &str) -> bool {
        let removed = self.providers.update(|providers| {
            let before = providers.len();
            providers.retain(|e| e.provider.id() != id);
            before != providers.len()
        });
        if removed {
            debug!("PluginManager: tool provider '{}' unregistered", id);
        }
        removed
    }

    pub fn tool_provider_ids(&self) -> Vec<String> {
        self.providers
            .load()
            .iter()
            .map(|e| e.provider.id().to_string())
            .collect()
    }

    /// Enable or disable a provider by id. The flag outlives re-registration.
    pub fn set_tool_provider_enabled(&self, id: &str, enabled: bool) {
        self.disabled_providers.update(|disabled| {
            if enabled {
                disabled.remove(id);
            } else {
                disabled.insert(id.to_string());
            }
        });
    }

    pub fn is_tool_provider_enabled(&self, id: &str) -> bool {
        !self.disabled_providers.load().contains(id)
    }

    pub fn disabled_tool_providers(&self) -> HashSet<String> {
        HashSet::clone(&self.disabled_providers.load())
    }

    pub fn restore_disabled_tool_providers(&self, disabled: HashSet<String>) {
        self.disabled_providers.update(|current| *current = disabled);
    }

    // ------------------------------------------------------------------
    // Tool overrides
    // ------------------------------------------------------------------

    /// Override a tool's availability by name, across all providers.
    pub fn set_tool_enabled(&self, name: &str, enabled: bool) {
        self.tool_overrides.update(|overrides| {
            overrides.insert(name.to_string(), enabled);
        });
    }

    /// Drop the override so the tool follows its provider again.
    pub fn clear_tool_override(&self, name: &str) {
        self.tool_overrides.update(|overrides| {
            overrides.remove(name);
        });
    }

    pub fn is_tool_enabled(&self, name: &str) -> bool {
        self.tool_overrides.load().get(name).copied().unwrap_or(true)
    }

    pub fn tool_overrides(&self) -> HashMap<String, bool> {
        HashMap::clone(&self.tool_overrides.load())
    }

    pub fn restore_tool_overrides(&self, overrides: HashMap<String, bool>) {
        self.tool_overrides.update(|current| *current = overrides);
    }

    // ------------------------------------------------------------------
    // Tool resolution
    // ------------------------------------------------------------------

    fn enabled_providers(&self) -> Vec<Arc<dyn ToolProvider>> {
        let disabled = self.disabled_providers.load();
        self.providers
            .load()
            .iter()
            .filter(|e| !disabled.contains(e.provider.id()))
            .map(|e| Arc::clone(&e.provider))
            .collect()
    }

    /// Tools offered to the model: enabled providers only, overrides applied, one entry per name.
    pub fn get_all_tools(&self) -> Vec<ToolDefinition> {
        let overrides = self.tool_overrides.load();
        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for provider in self.enabled_providers() {
            for tool in provider.get_tools() {
                if overrides.get(&tool.name) == Some(&false) {
                    continue;
                }
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                }
            }
        }
        tools
    }

    /// Every tool declared by every provider, including disabled and shadowed ones.
    pub fn list_tools(&self) -> Vec<ToolListing> {
        let overrides = self.tool_overrides.load();
        let disabled = self.disabled_providers.load();
        let mut owners = HashSet::new();
        let mut listing = Vec::new();
        for entry in self.providers.load().iter() {
            let provider_id = entry.provider.id().to_string();
            let provider_enabled = !disabled.contains(&provider_id);
            for definition in entry.provider.get_tools() {
                let enabled = provider_enabled && overrides.get(&definition.name) != Some(&false);
                let shadowed = provider_enabled && !owners.insert(definition.name.clone());
                listing.push(ToolListing {
                    provider_id: provider_id.clone(),
                    definition,
                    enabled,
                    shadowed,
                });
            }
        }
        listing
    }

    /// Look up a tool definition the way [`execute_tool`](Self::execute_tool) resolves it.
    pub fn find_tool(&self, name: &str) -> Option<ToolDefinition> {
        if !self.is_tool_enabled(name) {
            return None;
        }
        self.enabled_providers()
            .iter()
            .find_map(|p| p.get_tools().into_iter().find(|t| t.name == name))
    }

    /// Execute a tool by name. Never fails: every problem becomes a failed [`ToolResult`].
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> ToolResult {
        if !self.is_tool_enabled(name) {
            debug!("PluginManager::execute_tool(...): '{}' is switched off", name);
            return ToolResult::failure(ToolError::Disabled(name.to_string()).to_string());
        }

        let owner = self
            .enabled_providers()
            .into_iter()
            .find(|p| p.get_tools().iter().any(|t| t.name == name));
        let provider = match owner {
            Some(provider) => provider,
            None => {
                let declared_by_disabled = self
                    .providers
                    .load()
                    .iter()
                    .any(|e| e.provider.get_tools().iter().any(|t| t.name == name));
                let error = if declared_by_disabled {
                    ToolError::Disabled(name.to_string())
                } else {
                    ToolError::NotFound(name.to_string())
                };
                debug!("PluginManager::execute_tool(...): {}", error);
                return ToolResult::failure(error.to_string());
            }
        };

        let provider_id = provider.id().to_string();
        let result = match provider.execute_tool(name, arguments).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    "PluginManager::execute_tool(...): '{}' via '{}' failed: {}",
                    name, provider_id, err
                );
                ToolResult::failure(ToolError::ExecutionFailed(err.to_string()).to_string())
            }
        };
        result.with_metadata("provider", Value::String(provider_id))
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    /// Panels from every loaded plugin, stamped with the plugin id.
    pub fn get_all_panels(&self) -> Vec<PanelDescriptor> {
        self.panels
            .load()
            .iter()
            .flat_map(|entry| {
                entry.provider.panels().into_iter().map(move |mut panel| {
                    panel.plugin_id = entry.owner.clone();
                    panel
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Register (or take over) a command. `source` becomes its owner.
    pub fn register_command(
        &self,
        name: &str,
        description: &str,
        handler: CommandHandler,
        source: &str,
    ) {
        let entry = CommandEntry {
            description: description.to_string(),
            handler,
            source: source.to_string(),
            enabled: true,
        };
        let previous = self
            .commands
            .update(|commands| commands.insert(name.to_string(), entry));
        if let Some(previous) = previous {
            if previous.source != source {
                warn!(
                    "PluginManager::register_command(...): '/{}' moves from '{}' to '{}'",
                    name, previous.source, source
                );
            }
        }
    }

    pub fn unregister_command(&self, name: &str) -> bool {
        self.commands.update(|commands| commands.remove(name).is_some())
    }

    /// Lookup by exact name. Disabled commands are invisible here.
    pub fn get_command(&self, name: &str) -> Option<CommandInfo> {
        self.commands
            .load()
            .get(name)
            .filter(|entry| entry.enabled)
            .map(|entry| command_info(name, entry))
    }

    pub fn set_command_enabled(&self, name: &str, enabled: bool) -> bool {
        self.commands.update(|commands| match commands.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        })
    }

    /// All commands, disabled ones included, sorted by name.
    pub fn list_commands(&self) -> Vec<CommandInfo> {
        self.commands
            .load()
            .iter()
            .map(|(name, entry)| command_info(name, entry))
            .collect()
    }

    pub async fn execute_command(
        &self,
        name: &str,
        input: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let handler = self
            .commands
            .load()
            .get(name)
            .filter(|entry| entry.enabled)
            .map(|entry| Arc::clone(&entry.handler));
        match handler {
            Some(handler) => handler(input.to_string()).await,
            None => Err(format!("Unknown command: /{}", name).into()),
        }
    }

    // ------------------------------------------------------------------
    // Plugin configuration
    // ------------------------------------------------------------------

    /// Stored configuration for a plugin; empty when nothing was saved.
    pub fn get_plugin_config(&self, plugin_id: &str) -> PluginConfig {
        let configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner);
        match configs.get(plugin_id) {
            Some(Value::Object(config)) => config.clone(),
            _ => PluginConfig::new(),
        }
    }

    pub fn save_plugin_config(
        &self,
        plugin_id: &str,
        config: PluginConfig,
    ) -> Result<(), StoreError> {
        let mut configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner);
        configs.insert(plugin_id.to_string(), Value::Object(config));
        self.write_configs(&configs)
    }

    /// Forget one plugin's configuration.
    pub fn clear_plugin_data(&self, plugin_id: &str) -> Result<(), StoreError> {
        let mut configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner);
        configs.remove(plugin_id);
        self.write_configs(&configs)
    }

    pub fn clear_all_plugin_data(&self) -> Result<(), StoreError> {
        let mut configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner);
        configs.clear();
        self.store.clear_all()
    }

    fn write_configs(&self, configs: &Map<String, Value>) -> Result<(), StoreError> {
        let json = serde_json::to_string(configs)?;
        self.store.save_all(&json).map_err(|err| {
            warn!("PluginManager: could not persist plugin configuration: {}", err);
            err
        })
    }
}

fn command_info(name: &str, entry: &CommandEntry) -> CommandInfo {
    CommandInfo {
        name: name.to_string(),
        description: entry.description.clone(),
        source: entry.source.clone(),
        enabled: entry.enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::CommandFuture;
    use crate::store::MemoryPluginConfigStore;
    use crate::tool_providers::FunctionToolProvider;
    use serde_json::json;

    fn provider(id: &str, tools: &[&str]) -> Arc<FunctionToolProvider> {
        let provider = FunctionToolProvider::new(id);
        for tool in tools {
            let label = format!("{}:{}", id, tool);
            provider.register_tool(
                ToolDefinition::new(*tool, "test tool"),
                Arc::new(move |_args| Ok(ToolResult::success(json!(label.clone())))),
            );
        }
        Arc::new(provider)
    }

    fn manager() -> PluginManager {
        PluginManager::new(Arc::new(MemoryPluginConfigStore::new()))
    }

    #[tokio::test]
    async fn test_first_registered_provider_wins() {
        let manager = manager();
        manager.register_tool_provider(provider("a", &["search", "nap"]));
        manager.register_tool_provider(provider("b", &["search", "play"]));

        let names: Vec<_> = manager.get_all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["search", "nap", "play"]);

        for _ in 0..3 {
            let result = manager.execute_tool("search", json!({})).await;
            assert_eq!(result.output, json!("a:search"));
            assert_eq!(result.metadata["provider"], json!("a"));
        }

        let shadowed: Vec<_> = manager.list_tools().into_iter().filter(|l| l.shadowed).collect();
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed[0].provider_id, "b");
    }

    #[tokio::test]
    async fn test_disabled_provider_falls_through_to_next() {
        let manager = manager();
        manager.register_tool_provider(provider("a", &["search"]));
        manager.register_tool_provider(provider("b", &["search"]));
        manager.set_tool_provider_enabled("a", false);

        let result = manager.execute_tool("search", json!({})).await;
        assert_eq!(result.output, json!("b:search"));

        manager.set_tool_provider_enabled("b", false);
        let result = manager.execute_tool("search", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Tool is disabled: search"));
        assert!(manager.get_all_tools().is_empty());
    }

    #[tokio::test]
    async fn test_override_blocks_execution_and_listing() {
        let manager = manager();
        manager.register_tool_provider(provider("a", &["nap", "play"]));
        manager.set_tool_enabled("nap", false);

        let names: Vec<_> = manager.get_all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["play"]);
        let result = manager.execute_tool("nap", json!({})).await;
        assert_eq!(result.error.as_deref(), Some("Tool is disabled: nap"));

        let snapshot = manager.tool_overrides();
        manager.clear_tool_override("nap");
        assert!(manager.execute_tool("nap", json!({})).await.success);
        manager.restore_tool_overrides(snapshot);
        assert!(!manager.is_tool_enabled("nap"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = manager().execute_tool("fly", json!({})).await;
        assert_eq!(result.error.as_deref(), Some("Tool not found: fly"));
    }

    #[test]
    fn test_reregistering_keeps_position() {
        let manager = manager();
        manager.register_tool_provider(provider("a", &["x"]));
        manager.register_tool_provider(provider("b", &["x"]));
        manager.register_tool_provider(provider("a", &["y"]));
        assert_eq!(manager.tool_provider_ids(), vec!["a", "b"]);
        assert!(manager.unregister_tool_provider("a"));
        assert!(!manager.unregister_tool_provider("a"));
    }

    #[tokio::test]
    async fn test_disabled_command_is_listed_but_not_resolved() {
        let manager = manager();
        let handler: CommandHandler = Arc::new(|input: String| -> CommandFuture {
            Box::pin(async move { Ok(format!("meow {}", input)) })
        });
        manager.register_command("meow", "Make a sound", handler, "sounds");

        assert_eq!(manager.execute_command("meow", "twice").await.unwrap(), "meow twice");
        assert!(manager.set_command_enabled("meow", false));
        assert!(manager.get_command("meow").is_none());
        assert!(manager.execute_command("meow", "").await.is_err());
        let listed = manager.list_commands();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].enabled);
    }

    #[test]
    fn test_malformed_document_loads_as_empty() {
        let store = Arc::new(MemoryPluginConfigStore::with_document("{not json"));
        let manager = PluginManager::new(store.clone());
        assert!(manager.get_plugin_config("weather").is_empty());

        let mut config = PluginConfig::new();
        config.insert("units".into(), json!("metric"));
        manager.save_plugin_config("weather", config).unwrap();
        assert_eq!(store.document().unwrap(), r#"{"weather":{"units":"metric"}}"#);
    }
}

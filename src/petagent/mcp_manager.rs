//! Supervisor for the configured MCP servers.
//!
//! [`McpManager`] keeps the persisted [`McpServerConfig`] list, one live [`McpClient`] per
//! connected server, and one [`McpToolProvider`] bridge per connected server registered with
//! the [`PluginManager`]. The config list and a derived status map are published through
//! `tokio::sync::watch` channels and recomputed after every mutating operation.
//!
//! The server name is the connection key: connecting a server always tears down any earlier
//! connection of the same name first, and editing a config disconnects its live binding.
//!
//! Each live client's connection state is watched, so a lost event stream or a reconnect
//! made by a bridge shows up in the published statuses without any manager call.
//!
//! ```rust,no_run
//! use mcp::McpServerConfig;
//! use petagent::mcp_manager::McpManager;
//! use petagent::plugin_manager::PluginManager;
//! use petagent::store::MemoryPluginConfigStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let plugins = Arc::new(PluginManager::new(Arc::new(MemoryPluginConfigStore::new())));
//! let manager = McpManager::new(Arc::clone(&plugins)).with_persist(Arc::new(
//!     |servers: &[McpServerConfig]| {
//!         println!("{} servers to save", servers.len());
//!     },
//! ));
//!
//! manager
//!     .initialize(vec![
//!         McpServerConfig::new("files", "http://localhost:3001/sse").with_auto_start(true),
//!     ])
//!     .await;
//!
//! let mut statuses = manager.subscribe_statuses();
//! statuses.changed().await.ok();
//! println!("{:?}", statuses.borrow().get("files"));
//! # }
//! ```

use crate::event::{EventHandler, McpEvent};
use crate::mcp_bridge::{bridge_id, McpToolProvider};
use crate::plugin_manager::PluginManager;
use crate::store::SettingsStore;
use futures_util::future::join_all;
use log::{error, info, warn};
use mcp::{McpClient, McpClientOptions, McpError, McpServerConfig, McpServerStatus};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receives the full server list after every config mutation.
pub type ServerPersistCallback = Arc<dyn Fn(&[McpServerConfig]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum McpManagerError {
    /// No config with that name.
    UnknownServer(String),
    /// The config exists but is disabled.
    ServerDisabled(String),
    /// The config itself is unusable (empty name, bad URL).
    InvalidConfig(String),
    /// The connect sequence failed.
    Connect { server: String, source: McpError },
}

impl fmt::Display for McpManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpManagerError::UnknownServer(name) => write!(f, "Unknown MCP server: {}", name),
            McpManagerError::ServerDisabled(name) => write!(f, "MCP server is disabled: {}", name),
            McpManagerError::InvalidConfig(msg) => write!(f, "Invalid MCP server config: {}", msg),
            McpManagerError::Connect { server, source } => {
                write!(f, "Could not connect to MCP server '{}': {}", server, source)
            }
        }
    }
}

impl Error for McpManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            McpManagerError::Connect { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type ClientMap = Arc<Mutex<HashMap<String, Arc<McpClient>>>>;

pub struct McpManager {
    plugins: Arc<PluginManager>,
    options: McpClientOptions,
    clients: ClientMap,
    bridges: Mutex<HashMap<String, Arc<McpToolProvider>>>,
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
    configs: watch::Sender<Vec<McpServerConfig>>,
    statuses: Arc<watch::Sender<HashMap<String, McpServerStatus>>>,
    events: Option<Arc<dyn EventHandler>>,
    persist: Option<ServerPersistCallback>,
}

impl McpManager {
    pub fn new(plugins: Arc<PluginManager>) -> Self {
        let (configs, _) = watch::channel(Vec::new());
        let (statuses, _) = watch::channel(HashMap::new());
        Self {
            plugins,
            options: McpClientOptions::default(),
            clients: Arc::new(Mutex::new(HashMap::new())),
            bridges: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            configs,
            statuses: Arc::new(statuses),
            events: None,
            persist: None,
        }
    }

    /// Timeouts and client identity used for every client this manager creates.
    pub fn with_options(mut self, options: McpClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_persist(mut self, persist: ServerPersistCallback) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Persist the server list into the MCP part of the application settings.
    pub fn with_settings_store(self, store: Arc<dyn SettingsStore>) -> Self {
        self.with_persist(Arc::new(move |servers: &[McpServerConfig]| {
            if let Err(err) = store.save_mcp_servers(servers) {
                error!("McpManager: could not persist server list: {}", err);
            }
        }))
    }

    async fn emit(&self, event: McpEvent) {
        if let Some(events) = &self.events {
            events.on_mcp_event(&event).await;
        }
    }

    /// Seed the config list and start every `autoStart` + `enabled` server concurrently.
    ///
    /// A server that fails to start is logged and left disconnected; the others are not
    /// affected.
    pub async fn initialize(&self, configs: Vec<McpServerConfig>) {
        let autostart: Vec<String> = configs
            .iter()
            .filter(|c| c.auto_start && c.enabled)
            .map(|c| c.name.clone())
            .collect();
        self.configs.send_replace(configs);
        self.refresh_statuses();

        let attempts = autostart.iter().map(|name| async move {
            if let Err(err) = self.connect_server(name).await {
                error!("McpManager::initialize(...): autostart of '{}' failed: {}", name, err);
            }
        });
        join_all(attempts).await;
        info!(
            "McpManager::initialize(...): {} configured, {} connected",
            self.configs.borrow().len(),
            self.connected_servers().len()
        );
    }

    pub fn server_config(&self, name: &str) -> Option<McpServerConfig> {
        self.configs.borrow().iter().find(|c| c.name == name).cloned()
    }

    pub fn server_configs(&self) -> Vec<McpServerConfig> {
        self.configs.borrow().clone()
    }

    /// (Re)connect one server and bridge its tools into the plugin manager.
    pub async fn connect_server(&self, name: &str) -> Result<(), McpManagerError> {
        let config = self
            .server_config(name)
            .ok_or_else(|| McpManagerError::UnknownServer(name.to_string()))?;
        if !config.enabled {
            return Err(McpManagerError::ServerDisabled(name.to_string()));
        }

        self.disconnect_server(name).await;
        self.emit(McpEvent::Connecting {
            server: name.to_string(),
        })
        .await;

        let client = McpClient::new(config, self.options.clone())
            .map(Arc::new)
            .map_err(|source| McpManagerError::Connect {
                server: name.to_string(),
                source,
            })?;
        // kept even if the connect fails so its last error shows up in the status
        lock(&self.clients).insert(name.to_string(), Arc::clone(&client));
        self.watch_client(name, &client);

        if let Err(source) = client.connect().await {
            self.refresh_statuses();
            self.emit(McpEvent::ConnectFailed {
                server: name.to_string(),
                error: source.to_string(),
            })
            .await;
            return Err(McpManagerError::Connect {
                server: name.to_string(),
                source,
            });
        }

        // a disconnect or a newer connect may have replaced this client meanwhile
        if !self.is_current_client(name, &client) {
            client.disconnect();
            return Err(McpManagerError::Connect {
                server: name.to_string(),
                source: McpError::Disconnected,
            });
        }

        let mut bridge = McpToolProvider::new(Arc::clone(&client));
        if let Some(events) = &self.events {
            bridge = bridge.with_event_handler(Arc::clone(events));
        }
        let bridge = Arc::new(bridge);
        let tool_count = bridge.client().tools().len();
        self.plugins.register_tool_provider(bridge.clone());
        lock(&self.bridges).insert(name.to_string(), bridge);

        self.refresh_statuses();
        info!(
            "McpManager::connect_server(...): '{}' connected with {} tool(s)",
            name, tool_count
        );
        self.emit(McpEvent::Connected {
            server: name.to_string(),
            tool_count,
        })
        .await;
        Ok(())
    }

    fn is_current_client(&self, name: &str, client: &Arc<McpClient>) -> bool {
        lock(&self.clients)
            .get(name)
            .map_or(false, |current| Arc::ptr_eq(current, client))
    }

    /// Republish `name`'s status on every state change of `client`, until the client is
    /// replaced or dropped.
    fn watch_client(&self, name: &str, client: &Arc<McpClient>) {
        let mut changes = client.subscribe_state();
        let weak: Weak<McpClient> = Arc::downgrade(client);
        let clients = Arc::clone(&self.clients);
        let statuses = Arc::clone(&self.statuses);
        let server = name.to_string();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let client = match weak.upgrade() {
                    Some(client) => client,
                    None => break,
                };
                let current = lock(&clients)
                    .get(&server)
                    .map_or(false, |c| Arc::ptr_eq(c, &client));
                if !current {
                    break;
                }
                let status = client.status();
                statuses.send_modify(|map| {
                    if let Some(entry) = map.get_mut(&server) {
                        *entry = status;
                    }
                });
            }
        });
        if let Some(previous) = lock(&self.watchers).insert(name.to_string(), task) {
            previous.abort();
        }
    }

    /// Drop a server's bridge and connection. Returns `false` if it had neither.
    pub async fn disconnect_server(&self, name: &str) -> bool {
        let bridge = lock(&self.bridges).remove(name);
        if bridge.is_some() {
            self.plugins.unregister_tool_provider(&bridge_id(name));
        }
        let client = lock(&self.clients).remove(name);
        if let Some(watcher) = lock(&self.watchers).remove(name) {
            watcher.abort();
        }
        if let Some(client) = &client {
            client.disconnect();
        }
        let existed = bridge.is_some() || client.is_some();
        if existed {
            self.refresh_statuses();
            self.emit(McpEvent::Disconnected {
                server: name.to_string(),
            })
            .await;
        }
        existed
    }

    fn validate(config: &McpServerConfig) -> Result<(), McpManagerError> {
        if config.name.trim().is_empty() {
            return Err(McpManagerError::InvalidConfig("server name is empty".to_string()));
        }
        if reqwest::Url::parse(&config.url).is_err() {
            return Err(McpManagerError::InvalidConfig(format!(
                "'{}' is not a valid URL",
                config.url
            )));
        }
        Ok(())
    }

    fn persist_configs(&self) {
        let snapshot = self.configs.borrow().clone();
        if let Some(persist) = &self.persist {
            persist(&snapshot);
        }
    }

    /// Insert a config, or replace the one with the same name. A replaced live server is
    /// disconnected.
    pub async fn add_server_config(&self, config: McpServerConfig) -> Result<(), McpManagerError> {
        Self::validate(&config)?;
        let name = config.name.clone();
        let mut replaced = false;
        self.configs.send_modify(|configs| {
            match configs.iter_mut().find(|c| c.name == config.name) {
                Some(existing) => {
                    *existing = config;
                    replaced = true;
                }
                None => configs.push(config),
            }
        });
        if replaced && self.is_live(&name) {
            self.disconnect_server(&name).await;
        }
        self.persist_configs();
        self.refresh_statuses();
        Ok(())
    }

    /// Replace an existing config by name. The old binding is disconnected if it was live.
    pub async fn update_server_config(
        &self,
        config: McpServerConfig,
    ) -> Result<(), McpManagerError> {
        Self::validate(&config)?;
        if self.server_config(&config.name).is_none() {
            return Err(McpManagerError::UnknownServer(config.name));
        }
        self.add_server_config(config).await
    }

    /// Forget a server, disconnecting it first.
    pub async fn remove_server_config(&self, name: &str) -> Result<(), McpManagerError> {
        if self.server_config(name).is_none() {
            return Err(McpManagerError::UnknownServer(name.to_string()));
        }
        self.disconnect_server(name).await;
        self.configs.send_modify(|configs| configs.retain(|c| c.name != name));
        self.persist_configs();
        self.refresh_statuses();
        Ok(())
    }

    fn is_live(&self, name: &str) -> bool {
        lock(&self.clients).contains_key(name)
    }

    pub fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        lock(&self.clients).get(name).cloned()
    }

    /// Names of servers whose client is currently connected.
    pub fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.clients)
            .iter()
            .filter(|(_, client)| client.is_connected())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Current status of every configured server, computed on the spot.
    pub fn statuses(&self) -> HashMap<String, McpServerStatus> {
        let clients = lock(&self.clients);
        self.configs
            .borrow()
            .iter()
            .map(|config| {
                let status = clients
                    .get(&config.name)
                    .map(|client| client.status())
                    .unwrap_or_default();
                (config.name.clone(), status)
            })
            .collect()
    }

    /// Recompute statuses and publish them to subscribers.
    pub fn refresh_statuses(&self) -> HashMap<String, McpServerStatus> {
        let statuses = self.statuses();
        self.statuses.send_replace(statuses.clone());
        statuses
    }

    pub fn subscribe_configs(&self) -> watch::Receiver<Vec<McpServerConfig>> {
        self.configs.subscribe()
    }

    pub fn subscribe_statuses(&self) -> watch::Receiver<HashMap<String, McpServerStatus>> {
        self.statuses.subscribe()
    }

    /// Disconnect every server. Configs are kept.
    pub async fn shutdown(&self) {
        let names: Vec<String> = lock(&self.clients).keys().cloned().collect();
        for name in names {
            self.disconnect_server(&name).await;
        }
        if !lock(&self.bridges).is_empty() {
            warn!("McpManager::shutdown(): bridges left without a client");
        }
    }
}

impl Drop for McpManager {
    fn drop(&mut self) {
        for (_, watcher) in lock(&self.watchers).drain() {
            watcher.abort();
        }
    }
}

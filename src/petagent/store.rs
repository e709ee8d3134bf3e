//! Persistence ports consumed by the registries, plus in-memory implementations.
//!
//! The storage medium is the host's business. The runtime only needs two narrow
//! capabilities: one opaque JSON document holding every plugin's configuration, and the
//! application settings (MCP server list and provider instance list).

use crate::provider::ProviderInstanceConfig;
use mcp::McpServerConfig;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing medium failed.
    Io(String),
    /// The stored value could not be encoded or decoded.
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "Storage error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Storage for the plugin configuration document (`{"<pluginId>": {...}, ...}`).
pub trait PluginConfigStore: Send + Sync {
    /// The whole document, or `None` if nothing was ever saved.
    fn load_all(&self) -> Result<Option<String>, StoreError>;

    /// Replace the whole document.
    fn save_all(&self, json: &str) -> Result<(), StoreError>;

    fn clear_all(&self) -> Result<(), StoreError>;
}

/// Persisted application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub provider_instances: Vec<ProviderInstanceConfig>,
}

/// Storage for [`AgentSettings`].
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<AgentSettings, StoreError>;

    fn save(&self, settings: &AgentSettings) -> Result<(), StoreError>;

    /// Replace only the MCP server list.
    fn save_mcp_servers(&self, servers: &[McpServerConfig]) -> Result<(), StoreError> {
        let mut settings = self.load()?;
        settings.mcp_servers = servers.to_vec();
        self.save(&settings)
    }

    /// Replace only the provider instance list.
    fn save_provider_instances(
        &self,
        instances: &[ProviderInstanceConfig],
    ) -> Result<(), StoreError> {
        let mut settings = self.load()?;
        settings.provider_instances = instances.to_vec();
        self.save(&settings)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`PluginConfigStore`] kept in memory. Counts writes so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryPluginConfigStore {
    document: Mutex<Option<String>>,
    writes: AtomicUsize,
}

impl MemoryPluginConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an already persisted document.
    pub fn with_document(json: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(json.into())),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn document(&self) -> Option<String> {
        lock(&self.document).clone()
    }

    /// Number of `save_all`/`clear_all` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl PluginConfigStore for MemoryPluginConfigStore {
    fn load_all(&self) -> Result<Option<String>, StoreError> {
        Ok(self.document())
    }

    fn save_all(&self, json: &str) -> Result<(), StoreError> {
        *lock(&self.document) = Some(json.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        *lock(&self.document) = None;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<AgentSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<AgentSettings, StoreError> {
        Ok(lock(&self.settings).clone())
    }

    fn save(&self, settings: &AgentSettings) -> Result<(), StoreError> {
        *lock(&self.settings) = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_partial_document() {
        let settings: AgentSettings = serde_json::from_str(
            r#"{"mcpServers":[{"name":"fs","url":"http://h:1/sse","autoStart":true}]}"#,
        )
        .unwrap();
        assert_eq!(settings.mcp_servers.len(), 1);
        assert!(settings.mcp_servers[0].auto_start);
        assert!(settings.provider_instances.is_empty());
    }

    #[test]
    fn test_partial_saves_keep_the_other_list() {
        let store = MemorySettingsStore::default();
        store
            .save_mcp_servers(&[McpServerConfig::new("fs", "http://h:1/sse")])
            .unwrap();
        store.save_provider_instances(&[]).unwrap();
        assert_eq!(store.load().unwrap().mcp_servers.len(), 1);
    }

    #[test]
    fn test_memory_plugin_store_counts_writes() {
        let store = MemoryPluginConfigStore::with_document("{}");
        assert_eq!(store.load_all().unwrap().as_deref(), Some("{}"));
        store.save_all(r#"{"a":{}}"#).unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.load_all().unwrap(), None);
        assert_eq!(store.writes(), 2);
    }
}

//! Plugin capability traits.
//!
//! A plugin implements [`Plugin`] plus any subset of the narrow capability traits
//! ([`ToolProvider`], [`PanelProvider`], [`CommandSource`]). The registry never branches on
//! concrete plugin types; it asks the plugin for each capability through the `as_*`
//! accessors, which return `None` unless the plugin opts in:
//!
//! ```rust
//! use petagent::plugin::{PanelDescriptor, PanelProvider, Plugin};
//! use std::sync::Arc;
//!
//! struct Wardrobe;
//!
//! impl Plugin for Wardrobe {
//!     fn id(&self) -> &str {
//!         "wardrobe"
//!     }
//!
//!     fn as_panel_provider(self: Arc<Self>) -> Option<Arc<dyn PanelProvider>> {
//!         Some(self)
//!     }
//! }
//!
//! impl PanelProvider for Wardrobe {
//!     fn panels(&self) -> Vec<PanelDescriptor> {
//!         vec![PanelDescriptor::new("outfits", "Outfits")]
//!     }
//! }
//! ```

use crate::tool_protocol::ToolProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Per-plugin configuration object as persisted.
pub type PluginConfig = Map<String, Value>;

/// An in-process extension.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique id; also the key of the plugin's persisted configuration.
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    /// Called once when the plugin is registered, with its persisted configuration.
    async fn on_load(&self, _config: PluginConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Called once when the plugin is unregistered.
    async fn on_unload(&self) {}

    fn as_tool_provider(self: Arc<Self>) -> Option<Arc<dyn ToolProvider>> {
        None
    }

    fn as_panel_provider(self: Arc<Self>) -> Option<Arc<dyn PanelProvider>> {
        None
    }

    fn as_command_source(self: Arc<Self>) -> Option<Arc<dyn CommandSource>> {
        None
    }
}

/// A UI surface contributed by a plugin. The host decides how to render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Filled in by the registry with the contributing plugin's id.
    #[serde(default)]
    pub plugin_id: String,
}

impl PanelDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            icon: None,
            plugin_id: String::new(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

pub trait PanelProvider: Send + Sync {
    fn panels(&self) -> Vec<PanelDescriptor>;
}

pub type CommandFuture =
    Pin<Box<dyn Future<Output = Result<String, Box<dyn Error + Send + Sync>>> + Send>>;

/// Slash-command body. Receives the text after the command name.
pub type CommandHandler = Arc<dyn Fn(String) -> CommandFuture + Send + Sync>;

/// A slash-command a plugin wants registered on load.
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub handler: CommandHandler,
}

impl CommandSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: CommandHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler,
        }
    }
}

pub trait CommandSource: Send + Sync {
    fn commands(&self) -> Vec<CommandSpec>;
}

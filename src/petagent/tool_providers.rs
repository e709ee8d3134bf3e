//! Closure-backed [`ToolProvider`] for in-process tools.
//!
//! Plugins that only need a handful of tools can register plain Rust closures here instead
//! of implementing [`ToolProvider`] by hand:
//!
//! ```rust
//! use petagent::tool_protocol::{ToolDefinition, ToolProvider, ToolResult};
//! use petagent::tool_providers::FunctionToolProvider;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let provider = FunctionToolProvider::new("pet");
//! provider.register_tool(
//!     ToolDefinition::new("mood", "Current pet mood"),
//!     Arc::new(|_args| Ok(ToolResult::success(serde_json::json!("happy")))),
//! );
//!
//! let result = provider.execute_tool("mood", serde_json::json!({})).await.unwrap();
//! assert_eq!(result.output, "happy");
//! # }
//! ```

use crate::tool_protocol::{ToolDefinition, ToolError, ToolProvider, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Synchronous tool body.
pub type ToolFunction =
    Arc<dyn Fn(Value) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Future returned by an asynchronous tool body.
pub type ToolFuture =
    Pin<Box<dyn Future<Output = Result<ToolResult, Box<dyn Error + Send + Sync>>> + Send>>;

/// Asynchronous tool body.
pub type AsyncToolFunction = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

/// Tools registered as closures, listed in registration order.
pub struct FunctionToolProvider {
    id: String,
    tools: RwLock<Vec<(ToolDefinition, Handler)>>,
}

impl FunctionToolProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Register a synchronous tool, replacing any tool of the same name.
    pub fn register_tool(&self, definition: ToolDefinition, function: ToolFunction) {
        self.insert(definition, Handler::Sync(function));
    }

    pub fn register_async_tool(&self, definition: ToolDefinition, function: AsyncToolFunction) {
        self.insert(definition, Handler::Async(function));
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let before = tools.len();
        tools.retain(|(definition, _)| definition.name != name);
        tools.len() != before
    }

    fn insert(&self, definition: ToolDefinition, handler: Handler) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        match tools.iter_mut().find(|(d, _)| d.name == definition.name) {
            Some(slot) => *slot = (definition, handler),
            None => tools.push((definition, handler)),
        }
    }

    fn handler(&self, name: &str) -> Option<Handler> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(definition, _)| definition.name == name)
            .map(|(_, handler)| handler.clone())
    }
}

#[async_trait]
impl ToolProvider for FunctionToolProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(definition, _)| definition.clone())
            .collect()
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        // the lock is released before the handler runs
        match self.handler(name) {
            Some(Handler::Sync(function)) => function(arguments),
            Some(Handler::Async(function)) => function(arguments).await,
            None => Err(Box::new(ToolError::NotFound(name.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sync_and_async_tools() {
        let provider = FunctionToolProvider::new("math");
        provider.register_tool(
            ToolDefinition::new("double", "x * 2"),
            Arc::new(|args| {
                let x = args["x"].as_i64().unwrap_or(0);
                Ok(ToolResult::success(json!(x * 2)))
            }),
        );
        provider.register_async_tool(
            ToolDefinition::new("later", "async echo"),
            Arc::new(|args| Box::pin(async move { Ok(ToolResult::success(args)) })),
        );

        let names: Vec<_> = provider.get_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["double", "later"]);

        let doubled = provider.execute_tool("double", json!({"x": 21})).await.unwrap();
        assert_eq!(doubled.output, json!(42));
        let echoed = provider.execute_tool("later", json!({"a": 1})).await.unwrap();
        assert_eq!(echoed.output, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_reregister_replaces_and_unregister_removes() {
        let provider = FunctionToolProvider::new("p");
        provider.register_tool(
            ToolDefinition::new("t", "v1"),
            Arc::new(|_| Ok(ToolResult::success(json!(1)))),
        );
        provider.register_tool(
            ToolDefinition::new("t", "v2"),
            Arc::new(|_| Ok(ToolResult::success(json!(2)))),
        );
        assert_eq!(provider.get_tools().len(), 1);
        assert_eq!(provider.get_tools()[0].description, "v2");
        assert_eq!(provider.execute_tool("t", json!({})).await.unwrap().output, json!(2));

        assert!(provider.unregister_tool("t"));
        let err = provider.execute_tool("t", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool not found: t");
    }
}

//! One conversation with an LLM that can call tools.
//!
//! [`Agent::run`] sends the conversation plus every tool the [`PluginManager`] currently
//! offers, executes each tool call the model returns, feeds the results back as tool messages
//! and repeats until the model answers without calling tools or the iteration cap is reached.
//!
//! Tool failures never abort a turn: the model receives the failure text and decides what to
//! do. Only a failing LLM call ends the turn with an [`AgentError`].
//!
//! Tools that declare `requires_confirmation` are only executed when the
//! [`ConfirmationHook`] approves them. Without a hook they are always declined.

use crate::event::{AgentEvent, EventHandler};
use crate::plugin_manager::PluginManager;
use crate::provider::{
    ChatMessage, ChatRequest, ChatRole, LlmProvider, ProviderError, TokenUsage, ToolCall,
};
use crate::tool_protocol::ToolResult;
use log::{debug, warn};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default number of tool rounds per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

pub type ConfirmationFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Asked before a confirmation-required tool runs; `true` lets the call through.
pub type ConfirmationHook = Arc<dyn Fn(ToolCall) -> ConfirmationFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// The LLM call failed.
    Provider(ProviderError),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Provider(err) => write!(f, "LLM call failed: {}", err),
        }
    }
}

impl Error for AgentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AgentError::Provider(err) => Some(err),
        }
    }
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        AgentError::Provider(err)
    }
}

/// A tool call made during a turn, with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub result: ToolResult,
    /// 1-based tool round the call belongs to.
    pub iteration: usize,
}

/// Outcome of [`Agent::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
    /// Summed over every LLM round trip that reported usage.
    pub tokens_used: Option<TokenUsage>,
    /// The model still wanted tools after the last allowed round.
    pub hit_iteration_limit: bool,
}

pub struct Agent {
    pub id: String,
    llm: Arc<dyn LlmProvider>,
    plugins: Arc<PluginManager>,
    system_prompt: Option<String>,
    history: Mutex<Vec<ChatMessage>>,
    max_iterations: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    confirmation: Option<ConfirmationHook>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

fn preview(message: &str) -> String {
    message.chars().take(120).collect()
}

fn add_usage(total: &mut Option<TokenUsage>, usage: Option<TokenUsage>) {
    if let Some(usage) = usage {
        let sum = total.get_or_insert_with(TokenUsage::default);
        sum.input_tokens += usage.input_tokens;
        sum.output_tokens += usage.output_tokens;
        sum.total_tokens += usage.total_tokens;
    }
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        plugins: Arc<PluginManager>,
    ) -> Self {
        Self {
            id: id.into(),
            llm,
            plugins,
            system_prompt: None,
            history: Mutex::new(Vec::new()),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: None,
            max_tokens: None,
            confirmation: None,
            event_handler: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Cap on tool rounds per turn. Zero disables tool execution entirely.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_confirmation_hook(mut self, hook: ConfirmationHook) -> Self {
        self.confirmation = Some(hook);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Swap the model, e.g. after the primary instance changed. History is kept.
    pub fn set_llm(&mut self, llm: Arc<dyn LlmProvider>) {
        self.llm = llm;
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }

    /// Run one user turn. Concurrent turns on the same agent are serialized.
    pub async fn run(&self, user_message: &str) -> Result<AgentReply, AgentError> {
        let mut history = self.history.lock().await;
        self.emit(AgentEvent::TurnStarted {
            agent_id: self.id.clone(),
            message_preview: preview(user_message),
        })
        .await;

        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user_message));

        let tools = self.plugins.get_all_tools();
        let mut tokens_used = None;
        let mut tool_invocations = Vec::new();
        let mut hit_iteration_limit = false;
        let mut iteration = 1;

        let content = loop {
            self.emit(AgentEvent::LlmCallStarted {
                agent_id: self.id.clone(),
                iteration,
            })
            .await;
            let request = ChatRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };
            let response = self.llm.chat(request).await.map_err(|err| {
                warn!("Agent[{}]::run(...): LLM call {} failed: {}", self.id, iteration, err);
                AgentError::from(err)
            })?;
            add_usage(&mut tokens_used, response.usage);
            self.emit(AgentEvent::LlmCallCompleted {
                agent_id: self.id.clone(),
                iteration,
                tool_calls: response.tool_calls.len(),
                response_length: response.content.len(),
            })
            .await;

            if response.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant(response.content.clone()));
                break response.content;
            }
            if iteration > self.max_iterations {
                self.emit(AgentEvent::ToolMaxIterationsReached {
                    agent_id: self.id.clone(),
                    max_iterations: self.max_iterations,
                })
                .await;
                hit_iteration_limit = true;
                messages.push(ChatMessage::assistant(response.content.clone()));
                break response.content;
            }

            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in response.tool_calls {
                let result = self.invoke(&call, iteration).await;
                messages.push(ChatMessage::tool_result(call.id.clone(), result.to_model_text()));
                tool_invocations.push(ToolInvocation {
                    call,
                    result,
                    iteration,
                });
            }
            iteration += 1;
        };

        *history = messages
            .into_iter()
            .filter(|m| m.role != ChatRole::System)
            .collect();

        self.emit(AgentEvent::TurnCompleted {
            agent_id: self.id.clone(),
            tool_calls_made: tool_invocations.len(),
            response_length: content.len(),
            tokens_used,
        })
        .await;
        Ok(AgentReply {
            content,
            tool_invocations,
            tokens_used,
            hit_iteration_limit,
        })
    }

    async fn invoke(&self, call: &ToolCall, iteration: usize) -> ToolResult {
        self.emit(AgentEvent::ToolCallDetected {
            agent_id: self.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            iteration,
        })
        .await;

        let needs_confirmation = self
            .plugins
            .find_tool(&call.name)
            .map(|definition| definition.requires_confirmation)
            .unwrap_or(false);
        let result = if needs_confirmation && !self.confirm(call).await {
            self.emit(AgentEvent::ToolCallDeclined {
                agent_id: self.id.clone(),
                tool_name: call.name.clone(),
                iteration,
            })
            .await;
            ToolResult::failure(format!("The user declined to run '{}'", call.name))
        } else {
            self.plugins
                .execute_tool(&call.name, call.arguments.clone())
                .await
        };
        debug!(
            "Agent[{}]: tool '{}' -> success={}",
            self.id, call.name, result.success
        );

        self.emit(AgentEvent::ToolExecutionCompleted {
            agent_id: self.id.clone(),
            tool_name: call.name.clone(),
            success: result.success,
            error: result.error.clone(),
            iteration,
        })
        .await;
        result
    }

    async fn confirm(&self, call: &ToolCall) -> bool {
        match &self.confirmation {
            Some(hook) => hook(call.clone()).await,
            None => false,
        }
    }
}

//! One-shot and tool-augmented chat completions outside the daemon engine.
//!
//! Classification, verification, synthesis and learning extraction make a
//! single call through [`ChatService::complete_sync`]; quick mode runs a short
//! tool loop through [`ChatService::complete_with_tools`].

use conclave_core::error::ProviderError;
use conclave_core::message::{Message, Role};
use conclave_core::provider::{Provider, ProviderRequest, ToolDefinition};
use conclave_tools::ToolRouter;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::{result_cap, truncate_for_llm};

/// Default tool-loop bound when the caller passes zero.
pub const DEFAULT_TOOL_ITERATIONS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("max iterations ({0}) reached without final response")]
    MaxIterations(usize),
}

#[derive(Clone)]
pub struct ChatService {
    provider: Arc<dyn Provider>,
    router: Arc<ToolRouter>,
    default_model: String,
}

impl ChatService {
    pub fn new(provider: Arc<dyn Provider>, router: Arc<ToolRouter>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            router,
            default_model: default_model.into(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// `model` when set, else the configured default.
    pub fn resolve_model(&self, model: Option<&str>) -> String {
        model
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string()
    }

    /// One completion without tools. `system` is prepended unless empty or
    /// the transcript already starts with a system message.
    pub async fn complete_sync(
        &self,
        model: Option<&str>,
        system: &str,
        messages: Vec<Message>,
    ) -> Result<String, ChatError> {
        let request = ProviderRequest::new(self.resolve_model(model), with_system(system, messages));
        let response = self.provider.complete(request).await?;
        Ok(response.message.content)
    }

    /// Completion loop that executes tool calls until the model answers in
    /// plain text or `max_iterations` rounds pass.
    pub async fn complete_with_tools(
        &self,
        user_id: &str,
        model: Option<&str>,
        system: &str,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
        max_iterations: usize,
    ) -> Result<String, ChatError> {
        let max_iterations = if max_iterations == 0 {
            DEFAULT_TOOL_ITERATIONS
        } else {
            max_iterations
        };
        let model = self.resolve_model(model);
        let mut messages = with_system(system, messages);

        for iteration in 0..max_iterations {
            debug!(user_id = %user_id, iteration = iteration + 1, max_iterations, "Tool loop iteration");
            let request = ProviderRequest::new(model.clone(), messages.clone()).with_tools(tools.to_vec());
            let response = self.provider.complete(request).await?;
            let message = response.message;

            if message.tool_calls.is_empty() {
                info!(
                    user_id = %user_id,
                    chars = message.content.len(),
                    iterations = iteration + 1,
                    "Tool loop finished"
                );
                return Ok(message.content);
            }

            let calls = message.tool_calls.clone();
            messages.push(message);
            for call in &calls {
                let output = self.router.execute(user_id, call, tools).await;
                let content = truncate_for_llm(&output.content, &call.name, result_cap(0.0));
                messages.push(Message::tool_result(&call.id, &call.name, content));
            }
        }

        Err(ChatError::MaxIterations(max_iterations))
    }
}

fn with_system(system: &str, mut messages: Vec<Message>) -> Vec<Message> {
    let has_system = messages.iter().any(|m| m.role == Role::System);
    if !system.is_empty() && !has_system {
        messages.insert(0, Message::system(system));
    }
    messages
}

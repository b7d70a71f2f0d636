//! Tool execution backends, one per [`ToolSource`].

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::{RemoteBridge, ToolRegistry, ToolSource};
use std::sync::Arc;
use std::time::Duration;

/// What a tool produced. Failed runs still carry text the model can read.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Executes tools from one source.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    fn source(&self) -> ToolSource;

    async fn execute(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;
}

/// Runs tools from the in-process registry.
pub struct BuiltInBackend {
    registry: Arc<ToolRegistry>,
}

impl BuiltInBackend {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolBackend for BuiltInBackend {
    fn source(&self) -> ToolSource {
        ToolSource::BuiltIn
    }

    async fn execute(
        &self,
        _user_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        let result = tool.execute(arguments).await?;
        Ok(ToolOutput {
            content: result.output,
            is_error: !result.success,
        })
    }
}

/// Forwards calls to the user's connected client.
pub struct RemoteBridgeBackend {
    bridge: Arc<dyn RemoteBridge>,
    timeout: Duration,
}

impl RemoteBridgeBackend {
    pub fn new(bridge: Arc<dyn RemoteBridge>, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    pub fn bridge(&self) -> &Arc<dyn RemoteBridge> {
        &self.bridge
    }
}

#[async_trait]
impl ToolBackend for RemoteBridgeBackend {
    fn source(&self) -> ToolSource {
        ToolSource::RemoteBridge
    }

    async fn execute(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        if !self.bridge.is_connected(user_id) {
            return Err(ToolError::BridgeDisconnected(user_id.to_string()));
        }
        let content = self
            .bridge
            .execute_on_client(user_id, tool_name, arguments, self.timeout)
            .await?;
        Ok(ToolOutput::ok(content))
    }
}

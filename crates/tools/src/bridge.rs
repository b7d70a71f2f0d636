//! An in-process [`RemoteBridge`]: each "connected client" is a tool
//! registry living in this process. Backs the CLI's local mode and tests.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::provider::ToolDefinition;
use conclave_core::tool::{RemoteBridge, ToolCall, ToolRegistry};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Default)]
pub struct InProcessBridge {
    clients: RwLock<HashMap<String, Arc<ToolRegistry>>>,
}

impl InProcessBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user_id: impl Into<String>, registry: ToolRegistry) {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.into(), Arc::new(registry));
    }

    pub fn disconnect(&self, user_id: &str) {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
    }

    fn client(&self, user_id: &str) -> Option<Arc<ToolRegistry>> {
        self.clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }
}

#[async_trait]
impl RemoteBridge for InProcessBridge {
    fn is_connected(&self, user_id: &str) -> bool {
        self.client(user_id).is_some()
    }

    fn tools_for(&self, user_id: &str) -> Vec<ToolDefinition> {
        self.client(user_id)
            .map(|r| r.definitions())
            .unwrap_or_default()
    }

    async fn execute_on_client(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<String, ToolError> {
        let registry = self
            .client(user_id)
            .ok_or_else(|| ToolError::BridgeDisconnected(user_id.to_string()))?;
        let call = ToolCall {
            id: String::new(),
            name: tool_name.to_string(),
            arguments,
        };
        let result = tokio::time::timeout(timeout, registry.execute(&call))
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: tool_name.to_string(),
                timeout_secs: timeout.as_secs(),
            })??;
        if result.success {
            Ok(result.output)
        } else {
            Err(ToolError::ExecutionFailed {
                tool_name: tool_name.to_string(),
                reason: result.output,
            })
        }
    }
}

//! Tool routing: resolve each tool name to its source once, then dispatch
//! through the matching backend.

use conclave_core::error::ToolError;
use conclave_core::message::MessageToolCall;
use conclave_core::provider::ToolDefinition;
use conclave_core::tool::{RemoteBridge, ToolRegistry, ToolSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{BuiltInBackend, RemoteBridgeBackend, ToolBackend, ToolOutput};
use crate::search::{SEARCH_TOOLS_NAME, search_tool_definitions};

pub const BRIDGE_DISCONNECTED_MESSAGE: &str =
    "Error: remote client not connected. Please start your local client.";

pub struct ToolRouter {
    built_in: BuiltInBackend,
    remote: Option<RemoteBridgeBackend>,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            built_in: BuiltInBackend::new(registry),
            remote: None,
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn RemoteBridge>, timeout: Duration) -> Self {
        self.remote = Some(RemoteBridgeBackend::new(bridge, timeout));
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.built_in.registry()
    }

    pub fn bridge(&self) -> Option<&Arc<dyn RemoteBridge>> {
        self.remote.as_ref().map(|r| r.bridge())
    }

    /// Remote tools win over built-ins with the same name.
    pub fn resolve(&self, user_id: &str, tool_name: &str) -> ToolSource {
        match &self.remote {
            Some(remote) if remote.bridge().tools_for(user_id).iter().any(|t| t.name == tool_name) => {
                ToolSource::RemoteBridge
            }
            _ => ToolSource::BuiltIn,
        }
    }

    fn backend(&self, source: ToolSource) -> &dyn ToolBackend {
        match (source, &self.remote) {
            (ToolSource::RemoteBridge, Some(remote)) => remote as &dyn ToolBackend,
            _ => &self.built_in,
        }
    }

    /// Run one model-issued call. Never fails: errors become error text the
    /// model can read. `available` answers the tool-search meta-tool.
    pub async fn execute(
        &self,
        user_id: &str,
        call: &MessageToolCall,
        available: &[ToolDefinition],
    ) -> ToolOutput {
        let arguments: serde_json::Value = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    return ToolOutput::error(format!(
                        "Tool error: {}",
                        ToolError::InvalidArguments(e.to_string())
                    ));
                }
            }
        };

        if call.name == SEARCH_TOOLS_NAME {
            let query = arguments["query"].as_str().unwrap_or_default();
            return ToolOutput::ok(search_tool_definitions(available, query));
        }

        let source = self.resolve(user_id, &call.name);
        debug!(tool = %call.name, source = ?source, user_id = %user_id, "Routing tool call");

        match self.backend(source).execute(user_id, &call.name, arguments).await {
            Ok(output) => output,
            Err(ToolError::BridgeDisconnected(_)) => ToolOutput::error(BRIDGE_DISCONNECTED_MESSAGE),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolOutput::error(format!("Tool error: {e}"))
            }
        }
    }
}

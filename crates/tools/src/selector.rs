//! Chooses the tool definitions offered to a daemon.

use conclave_core::provider::ToolDefinition;
use conclave_core::tool::{RemoteBridge, ToolRegistry};
use std::collections::HashSet;
use std::sync::Arc;

use crate::search::search_tools_definition;

/// Providers reject requests with more tools than this.
pub const MAX_TOOLS: usize = 100;

pub struct ToolSelector {
    registry: Arc<ToolRegistry>,
    bridge: Option<Arc<dyn RemoteBridge>>,
}

impl ToolSelector {
    pub fn new(registry: Arc<ToolRegistry>, bridge: Option<Arc<dyn RemoteBridge>>) -> Self {
        Self { registry, bridge }
    }

    /// Every remote tool the user's client advertises, then built-ins not
    /// shadowed by a remote tool, then the search meta-tool. Built-ins are
    /// dropped first when over [`MAX_TOOLS`].
    pub fn select(&self, user_id: &str) -> Vec<ToolDefinition> {
        let mut selected: Vec<ToolDefinition> = self
            .bridge
            .as_ref()
            .map(|b| b.tools_for(user_id))
            .unwrap_or_default();
        selected.truncate(MAX_TOOLS - 1);

        let taken: HashSet<String> = selected.iter().map(|t| t.name.clone()).collect();
        let room = MAX_TOOLS - 1 - selected.len();
        selected.extend(
            self.registry
                .definitions()
                .into_iter()
                .filter(|t| !taken.contains(&t.name))
                .take(room),
        );

        selected.push(search_tools_definition());
        selected
    }
}

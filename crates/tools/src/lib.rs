//! Built-in tools and tool routing for Conclave daemons.
//!
//! Tools come from two sources (see [`conclave_core::ToolSource`]): the
//! in-process registry built here, and the user's own machine reached
//! through a `RemoteBridge`. [`ToolSelector`] picks what a daemon is offered;
//! [`ToolRouter`] dispatches each call to the right backend.

pub mod backend;
pub mod bash;
pub mod bridge;
pub mod read_file;
pub mod router;
pub mod search;
pub mod selector;

use conclave_core::tool::ToolRegistry;
use std::time::Duration;

pub use backend::{BuiltInBackend, RemoteBridgeBackend, ToolBackend, ToolOutput};
pub use bridge::InProcessBridge;
pub use router::ToolRouter;
pub use search::{SEARCH_TOOLS_NAME, search_tools_definition};
pub use selector::{MAX_TOOLS, ToolSelector};

/// Create a default tool registry with all built-in tools.
///
/// Security defaults:
/// - Bash: only common read-only commands
/// - File read: sensitive paths (~/.ssh, /etc/shadow, etc.) are blocked
pub fn default_registry(command_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let safe_commands = [
        "ls", "cat", "head", "tail", "echo", "pwd", "date", "wc", "grep", "find", "sort", "uniq",
        "git",
    ]
    .map(String::from)
    .to_vec();
    registry.register(Box::new(
        bash::BashTool::new(safe_commands).with_timeout(command_timeout),
    ));
    registry.register(Box::new(read_file::ReadFileTool::new()));
    registry
}

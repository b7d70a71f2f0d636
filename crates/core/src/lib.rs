//! # Conclave Core
//!
//! Domain types, traits, and error definitions for the Conclave multi-daemon
//! orchestrator. Every subsystem the orchestrator talks to (LLM providers,
//! tools, stores, the remote tool bridge) is a trait here; implementations
//! live in their own crates so tests can swap in scripted fakes.

pub mod daemon;
pub mod engram;
pub mod error;
pub mod event;
pub mod message;
pub mod plan;
pub mod provider;
pub mod session;
pub mod store;
pub mod task;
pub mod template;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use daemon::{
    Daemon, DaemonMessage, DaemonResult, DaemonStatus, DaemonToolResult, DaemonUpdate,
    UpdateKind, WorkingMemoryEntry,
};
pub use engram::{EngramEntry, EngramKind};
pub use error::{Error, OrchestratorError, ProviderError, Result, StoreError, ToolError};
pub use event::{Event, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use plan::{ClassificationResult, DaemonPlan, Mode};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use session::{Project, SavedDocument, Session, Skill};
pub use store::{
    DaemonStore, EngramStore, ProjectStore, SaveStore, SessionStore, SkillCatalog, StoreResult,
    Stores, TaskStore, TemplateStore,
};
pub use task::{Artifact, Task, TaskMode, TaskResult, TaskSource, TaskStatus};
pub use template::{DaemonTemplate, TemplateLearning, TemplateStats};
pub use tool::{RemoteBridge, Tool, ToolCall, ToolRegistry, ToolResult, ToolSource};

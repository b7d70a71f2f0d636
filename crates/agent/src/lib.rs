//! The daemon engine.
//!
//! A daemon is one autonomous agent bound to a task. [`DaemonRunner`] drives
//! its loop:
//!
//! 1. **Prompt** the LLM with the daemon's persona, task and tools
//! 2. **If tool calls**: execute them through the router, append results, loop
//! 3. **If text**: finish when the reply looks final, else ask it to continue
//!
//! The loop keeps the transcript inside the model's context window
//! ([`context`]), retries transient provider failures with backoff, and
//! reports progress as [`DaemonUpdate`](conclave_core::DaemonUpdate)s.
//! [`ChatService`] covers the one-shot calls the orchestrator makes itself.

pub mod chat;
pub mod completion;
pub mod context;
pub mod prompt;
pub mod runner;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use chat::{ChatError, ChatService, DEFAULT_TOOL_ITERATIONS};
pub use completion::{CompletionDetector, PhraseCompletion};
pub use context::{ContextWindow, LlmFailure};
pub use prompt::{DaemonPrompt, skills_section};
pub use runner::{CONTINUE_PROMPT, DaemonRunner, RunnerDeps};

//! Context-window management for daemon runs.
//!
//! | Stage | Module | When |
//! |-------|--------|------|
//! | Token accounting | [`token`], [`window`] | every iteration |
//! | Proactive and aggressive trim | [`window`] | usage above 80% of the window |
//! | Pre-flight estimate | [`window`] | before every LLM call |
//! | Overflow ladder | [`overflow`] | the provider reports a context overflow |
//! | Adaptive truncation | [`truncate`] | every new tool result |

pub mod overflow;
pub mod token;
pub mod truncate;
pub mod window;

pub use overflow::{LlmFailure, collapse_history, complete_with_recovery, emergency_trim};
pub use truncate::{result_cap, truncate_for_llm};
pub use window::ContextWindow;

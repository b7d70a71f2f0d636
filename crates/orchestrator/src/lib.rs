//! # Conclave Orchestrator
//!
//! Turns one user message into work. The [`Orchestrator`] classifies the
//! request, then either answers it directly (quick and status modes) or
//! deploys daemons: one at a time with verification and bounded automatic
//! retries, or as a dependency graph whose results are synthesized.
//!
//! Concurrency is bounded per user by the [`SlotManager`]. Everything the
//! user should see is published on the orchestrator's event bus; the
//! `*_sync` wrappers fold those events into a single reply.

pub mod classifier;
pub mod json;
pub mod learning;
mod modes;
pub mod prompts;
mod retry;
pub mod scheduler;
pub mod service;
mod single;
pub mod slots;
mod turn;
pub mod verify;

#[cfg(test)]
mod test_support;

pub use classifier::{Classifier, parse_classification};
pub use learning::{LearningExtractor, parse_learnings};
pub use service::{Orchestrator, UserRequest};
pub use slots::{SlotGuard, SlotManager};
pub use verify::{Verdict, parse_verdict};

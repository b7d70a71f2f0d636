//! Context-window bookkeeping for one daemon run.
//!
//! Tracks how full the model's window is and shrinks older tool results
//! before a request would overflow it. Two passes exist:
//!
//! | Pass | Trigger | Effect |
//! |------|---------|--------|
//! | Proactive trim | usage > 80% of the window | tool results outside the last 6 messages over 500 chars → 200 head + 200 tail |
//! | Aggressive trim | still over 80% after the proactive trim | every tool result over 300 chars → 150 head + 100 tail |
//!
//! The system prompt and the first user turn are never touched.

use conclave_core::message::{Message, Role};
use conclave_core::provider::{ToolDefinition, Usage};
use conclave_core::text::head_tail;
use tracing::{debug, info, warn};

use super::token::{estimate_chars, estimate_messages_tokens, estimate_tools_tokens};
use super::truncate::result_cap;

/// Fraction of the window at which older tool results start being trimmed.
pub const TRIM_THRESHOLD: f64 = 0.80;

/// Recent messages the proactive trim never touches.
const KEEP_TAIL: usize = 6;

/// Messages at the head of the transcript that are never trimmed.
const PROTECTED_HEAD: usize = 2;

const TRIM_MARKER: &str = "\n\n... [trimmed to fit context window] ...\n\n";
const AGGRESSIVE_MARKER: &str = "\n[aggressively trimmed]\n";

/// Rough token cost of the transcript before the first real usage figure.
const BASELINE_TOKENS: usize = 2000;

#[derive(Debug, Clone)]
pub struct ContextWindow {
    window: usize,
    tool_tokens: usize,
    last_prompt_tokens: usize,
}

impl ContextWindow {
    /// `tools` is costed once; the set does not change during a run.
    pub fn new(window: usize, tools: &[ToolDefinition]) -> Self {
        Self {
            window: window.max(1),
            tool_tokens: estimate_tools_tokens(tools),
            last_prompt_tokens: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn tool_tokens(&self) -> usize {
        self.tool_tokens
    }

    pub fn last_prompt_tokens(&self) -> usize {
        self.last_prompt_tokens
    }

    /// Remember the provider's real prompt size from the latest call.
    pub fn record_usage(&mut self, usage: Option<&Usage>) {
        if let Some(usage) = usage.filter(|u| u.prompt_tokens > 0) {
            self.last_prompt_tokens = usage.prompt_tokens as usize;
        }
    }

    /// Real prompt tokens when known, else a heuristic estimate.
    pub fn used_tokens(&self, messages: &[Message]) -> usize {
        if self.last_prompt_tokens > 0 {
            self.last_prompt_tokens
        } else {
            estimate_messages_tokens(messages) + self.tool_tokens
        }
    }

    /// Fill ratio used to size new tool results.
    pub fn fill_ratio(&self) -> f64 {
        let used = if self.last_prompt_tokens > 0 {
            self.last_prompt_tokens
        } else {
            self.tool_tokens + BASELINE_TOKENS
        };
        used as f64 / self.window as f64
    }

    /// Character budget for the next tool result.
    pub fn result_cap(&self) -> usize {
        result_cap(self.fill_ratio())
    }

    fn threshold(&self) -> usize {
        (self.window as f64 * TRIM_THRESHOLD) as usize
    }

    /// Trim older tool results when usage is past [`TRIM_THRESHOLD`].
    /// Returns whether anything was attempted.
    pub fn trim_if_needed(&mut self, messages: &mut [Message]) -> bool {
        let used = self.used_tokens(messages);
        if used <= self.threshold() {
            return false;
        }
        info!(
            tokens = used,
            window = self.window,
            fill_pct = used * 100 / self.window,
            "Context near limit, trimming older tool results"
        );
        self.shrink(messages);
        true
    }

    /// Second safety net: a character-based estimate that ignores the real
    /// usage figure. Forces a trim when the estimate exceeds the window.
    pub fn preflight(&mut self, messages: &mut [Message]) -> bool {
        let chars: usize = messages.iter().map(Message::payload_chars).sum();
        let estimated = estimate_chars(chars) + self.tool_tokens;
        if estimated <= self.window {
            return false;
        }
        warn!(
            estimated,
            window = self.window,
            "Pre-flight estimate exceeds context window, forcing trim"
        );
        self.shrink(messages);
        true
    }

    fn shrink(&mut self, messages: &mut [Message]) {
        let keep_tail = KEEP_TAIL.min(messages.len().saturating_sub(PROTECTED_HEAD));
        let trim_end = messages.len() - keep_tail;

        let mut trimmed = 0;
        for msg in messages
            .iter_mut()
            .take(trim_end)
            .skip(PROTECTED_HEAD)
            .filter(|m| m.role == Role::Tool && m.content.len() > 500)
        {
            msg.content = head_tail(&msg.content, 200, 200, TRIM_MARKER);
            trimmed += 1;
        }

        // The last real figure describes the untrimmed transcript.
        self.last_prompt_tokens = 0;
        debug!(trimmed, "Trimmed older tool results");

        if self.used_tokens(messages) > self.threshold() {
            aggressive_trim(messages);
        }
    }
}

fn aggressive_trim(messages: &mut [Message]) {
    info!("Aggressive trim: shrinking every tool result to 300 chars");
    for msg in messages
        .iter_mut()
        .skip(PROTECTED_HEAD)
        .filter(|m| m.role == Role::Tool && m.content.len() > 300)
    {
        msg.content = head_tail(&msg.content, 150, 100, AGGRESSIVE_MARKER);
    }
}

//! Deciding when a daemon's plain-text reply is its final answer.

/// Whether a reply without tool calls ends the run.
pub trait CompletionDetector: Send + Sync {
    fn is_complete(&self, response: &str) -> bool;
}

const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "task is complete",
    "i have completed",
    "here is the final",
    "here are the results",
    "in summary",
    "to summarize",
    "final result",
    "my findings",
    "i've finished",
    "i have finished",
];

/// Replies longer than this are treated as final even without a phrase.
pub const SUBSTANTIAL_REPLY_CHARS: usize = 500;

/// Completion by phrase match (case-insensitive) or reply length.
///
/// Known tradeoff: a long reply that is still mid-work counts as final, and
/// a short final reply without a phrase does not.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhraseCompletion;

impl CompletionDetector for PhraseCompletion {
    fn is_complete(&self, response: &str) -> bool {
        let lower = response.to_lowercase();
        COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
            || response.len() > SUBSTANTIAL_REPLY_CHARS
    }
}

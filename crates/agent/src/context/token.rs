//! Token estimation utilities.
//!
//! Uses a conservative character heuristic of ~3.2 characters per token,
//! which overestimates slightly for English text on BPE tokenizers. The
//! runner prefers the provider's real `prompt_tokens` whenever it has one.

use conclave_core::message::Message;
use conclave_core::provider::ToolDefinition;

/// Estimate the token count for `chars` characters. Rounds up.
pub fn estimate_chars(chars: usize) -> usize {
    (chars * 10).div_ceil(32)
}

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    estimate_chars(text.len())
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name, delimiters,
/// and formatting markers in the API wire format.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    overhead + estimate_chars(message.payload_chars())
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool definition (serialized as JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    let json = serde_json::to_string(tool).unwrap_or_default();
    estimate_tokens(&json)
}

/// Estimate tokens for a slice of tool definitions.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}

//! Error types for the Conclave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;
use uuid::Uuid;

/// The top-level error type for all Conclave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Orchestration errors ---
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    /// The prompt no longer fits the model's context window.
    #[error("context overflow: API error (status {status_code}): {message}")]
    ContextOverflow {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether this error means the request must shrink before it can succeed.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, ProviderError::ContextOverflow { .. })
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Remote client not connected for user {0}")]
    BridgeDisconnected(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Errors surfaced to callers of the orchestrator entry points.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to get session: {0}")]
    SessionUnavailable(String),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("task is not in a terminal state (status: {status})")]
    NotTerminal { status: String },

    #[error("maximum retry limit ({limit}) reached for this task")]
    RetryLimit { limit: usize },

    #[error("request exceeded its {secs}s ceiling")]
    Timeout { secs: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn overflow_is_detected_by_variant() {
        let err = ProviderError::ContextOverflow {
            status_code: 400,
            message: "maximum context length is 128000 tokens".into(),
        };
        assert!(err.is_context_overflow());
        assert!(err.to_string().starts_with("context overflow"));
        assert!(!ProviderError::Timeout("slow".into()).is_context_overflow());
    }

    #[test]
    fn retry_limit_message_names_the_limit() {
        let err = OrchestratorError::RetryLimit { limit: 3 };
        assert_eq!(
            err.to_string(),
            "maximum retry limit (3) reached for this task"
        );
    }

    #[test]
    fn store_not_found_displays_kind_and_id() {
        let err = Error::Store(StoreError::not_found("task", "abc"));
        assert!(err.to_string().contains("task not found: abc"));
    }
}

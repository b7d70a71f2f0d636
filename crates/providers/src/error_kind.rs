//! Classification of provider error responses.
//!
//! Providers report "your prompt is too long" in wildly different ways. All
//! of the string matching lives here so the context-overflow recovery ladder
//! only ever sees an [`ApiErrorKind`].

use conclave_core::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The request no longer fits the model's context window.
    ContextOverflow,
    RateLimited,
    Authentication,
    /// Anything else, including transient server errors.
    Other,
}

const OVERFLOW_STATUSES: [u16; 3] = [400, 413, 422];

const OVERFLOW_KEYWORDS: [&str; 8] = [
    "input too long",
    "context_length_exceeded",
    "maximum context length",
    "too many tokens",
    "token limit",
    "context length is only",
    "reduce the length of the input",
    "maximum input length",
];

/// Map an HTTP status and response body to an error kind.
pub fn classify_api_error(status_code: u16, body: &str) -> ApiErrorKind {
    match status_code {
        429 => return ApiErrorKind::RateLimited,
        401 | 403 => return ApiErrorKind::Authentication,
        s if OVERFLOW_STATUSES.contains(&s) => {}
        _ => return ApiErrorKind::Other,
    }

    let body = body.to_lowercase();
    let overflow = OVERFLOW_KEYWORDS.iter().any(|k| body.contains(k))
        || (body.contains("input_tokens") && body.contains("parameter"));

    if overflow {
        ApiErrorKind::ContextOverflow
    } else {
        ApiErrorKind::Other
    }
}

/// Whether `err` means the prompt must shrink before a retry can succeed.
///
/// Providers that already classify return [`ProviderError::ContextOverflow`];
/// plain API errors from other backends are classified from their body.
pub fn is_context_overflow(err: &ProviderError) -> bool {
    match err {
        ProviderError::ContextOverflow { .. } => true,
        ProviderError::ApiError {
            status_code,
            message,
        } => classify_api_error(*status_code, message) == ApiErrorKind::ContextOverflow,
        _ => false,
    }
}

/// Build the provider error for a non-success response.
pub fn to_provider_error(status_code: u16, body: String) -> ProviderError {
    match classify_api_error(status_code, &body) {
        ApiErrorKind::ContextOverflow => ProviderError::ContextOverflow {
            status_code,
            message: body,
        },
        ApiErrorKind::RateLimited => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        ApiErrorKind::Authentication => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        ApiErrorKind::Other => ProviderError::ApiError {
            status_code,
            message: body,
        },
    }
}
